//! Byzantine fault tolerance bounds for DON membership.
//!
//! A DON of `n` members tolerates `f` simultaneously faulty members only if
//! `n >= 3f + 1`. Violations are validation errors; `f` is never clamped.

use capreg_core::ValidationError;

/// Minimum DON size that tolerates `f` faulty members.
///
/// # Examples
///
/// ```
/// use capreg_consensus::min_members;
///
/// assert_eq!(min_members(0), 1);
/// assert_eq!(min_members(1), 4);
/// assert_eq!(min_members(2), 7);
/// ```
pub const fn min_members(f: u8) -> usize {
    3 * f as usize + 1
}

/// Largest `f` a DON of `n` members tolerates.
pub const fn max_faulty(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (n - 1) / 3
}

/// Check `n >= 3f + 1`.
pub const fn is_valid_fault_tolerance(n: usize, f: u8) -> bool {
    n >= min_members(f)
}

/// Validate `f` for a DON of `n` members.
pub fn check_fault_tolerance(n: usize, f: u8) -> Result<(), ValidationError> {
    if n == 0 {
        return Err(ValidationError::Empty("DON members"));
    }
    if !is_valid_fault_tolerance(n, f) {
        return Err(ValidationError::FaultTolerance { n, f });
    }
    Ok(())
}
