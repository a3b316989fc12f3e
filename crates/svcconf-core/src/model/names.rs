//! Name rules for services, instances, property groups and properties

use crate::errors::{RepoError, RepoResult};

/// Longest name accepted for any repository object
pub const MAX_NAME_LEN: usize = 255;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ',')
}

fn check_segment(segment: &str, whole: &str) -> RepoResult<()> {
    let mut chars = segment.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !first_ok || !chars.all(is_name_char) {
        return Err(RepoError::InvalidName {
            name: whole.to_string(),
        });
    }
    Ok(())
}

fn check_length(name: &str) -> RepoResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(RepoError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Service names are '/'-separated paths of simple names, e.g. `network/ssh`
///
/// # Errors
///
/// `InvalidName` when any segment breaks the simple-name rules.
pub fn validate_service_name(name: &str) -> RepoResult<()> {
    check_length(name)?;
    name.split('/').try_for_each(|seg| check_segment(seg, name))
}

/// Instance, property group and property names are simple names
///
/// # Errors
///
/// `InvalidName` for a name outside `MAX_NAME_LEN` or one with a
/// character not allowed in names.
pub fn validate_simple_name(name: &str) -> RepoResult<()> {
    check_length(name)?;
    check_segment(name, name)
}
