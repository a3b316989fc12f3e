//! Transaction application shared by every backend
//!
//! Backends check the base version, then call [`apply_entries`] on a copy of
//! the stored contents and persist the copy only if it returns `Ok`.

use crate::client::{Transaction, TxEntry};
use crate::errors::{RepoError, RepoResult};
use crate::model::{Contribution, Decoration, Layer, PgContents, PropertyContents};

fn value_type_mismatch(
    property: &str,
    expected: impl std::fmt::Display,
    got: impl std::fmt::Display,
) -> RepoError {
    RepoError::invalid_type(format!(
        "property '{}' has type {}, got a {} value",
        property, expected, got
    ))
}

fn layer_not_found(pg: &str, property: &str, layer: Layer) -> RepoError {
    RepoError::not_found(format!("{}/{} at layer {}", pg, property, layer))
}

/// Apply `entries` written by `owner` to `contents`
///
/// On error `contents` may be partially modified; callers apply to a copy.
/// Properties left without any contribution are removed, and the version is
/// bumped exactly once. A `CopyDecorations` entry makes the copied set final.
///
/// # Errors
///
/// `AlreadyExists` for a `New` entry the owner layer already contributes
/// to, `InvalidType` when an entry disagrees with the recorded type.
pub fn apply_entries(
    contents: &mut PgContents,
    owner: &Decoration,
    entries: &[TxEntry],
) -> RepoResult<()> {
    let layer = owner.layer;
    let mut decorate = false;
    let mut verbatim = false;

    for entry in entries {
        decorate |= entry.decorates();
        match entry {
            TxEntry::New {
                property,
                value_type,
            } => {
                let prop = contents
                    .properties
                    .entry(property.clone())
                    .or_insert_with(|| PropertyContents::new(property.clone()));
                if prop.contributions.contains_key(&layer) {
                    return Err(RepoError::already_exists(format!(
                        "{}/{} at layer {}",
                        contents.name, property, layer
                    )));
                }
                prop.contributions
                    .insert(layer, Contribution::new(*value_type, owner.source.clone()));
            }
            TxEntry::ChangeType {
                property,
                value_type,
            } => {
                let contribution = contents
                    .properties
                    .get_mut(property)
                    .and_then(|p| p.contributions.get_mut(&layer))
                    .ok_or_else(|| layer_not_found(&contents.name, property, layer))?;
                *contribution = Contribution::new(*value_type, owner.source.clone());
            }
            TxEntry::AddValue { property, value } => {
                let contribution = contents
                    .properties
                    .get_mut(property)
                    .and_then(|p| p.contributions.get_mut(&layer))
                    .ok_or_else(|| layer_not_found(&contents.name, property, layer))?;
                if value.value_type() != contribution.value_type {
                    return Err(value_type_mismatch(
                        property,
                        contribution.value_type,
                        value.value_type(),
                    ));
                }
                contribution.values.push(value.clone());
            }
            TxEntry::Retract { property } => {
                if let Some(prop) = contents.properties.get_mut(property) {
                    prop.contributions.remove(&layer);
                }
            }
            TxEntry::CopyProperty(prop) => {
                for (l, c) in &prop.contributions {
                    if let Some(bad) = c.values.iter().find(|v| v.value_type() != c.value_type) {
                        return Err(value_type_mismatch(
                            &format!("{} ({})", prop.name, l),
                            c.value_type,
                            bad.value_type(),
                        ));
                    }
                }
                contents.properties.insert(prop.name.clone(), prop.clone());
            }
            TxEntry::ModifyGroup { pg_type, flags } => {
                contents.pg_type = pg_type.clone();
                contents.flags = *flags;
            }
            TxEntry::CopyDecorations(decorations) => {
                contents.decorations = decorations.clone();
                verbatim = true;
            }
            TxEntry::Undecorate => {
                contents.decorations.remove(owner);
            }
        }
    }

    contents.properties.retain(|_, p| !p.is_empty());
    if decorate && !verbatim {
        contents.decorations.insert(owner.clone());
    }
    contents.version += 1;
    Ok(())
}

/// Whether committing `tx` would change anything but the version
///
/// An invalid transaction counts as a change so that the commit surfaces
/// its error.
pub fn would_change(tx: &Transaction) -> bool {
    let mut after = tx.base().clone();
    match apply_entries(&mut after, tx.owner(), tx.entries()) {
        Ok(()) => {
            after.version = tx.base().version;
            after != *tx.base()
        }
        Err(_) => true,
    }
}
