//! Structural comparison of recorded and observed tool outputs.

mod compare;
mod error_fuzz;
mod policy;

pub use compare::{
    coerce_ints_to_floats, first_difference, fuzzy_eq, loose_eq, scalar_differences, strict_eq,
    values_equal, Difference,
};
pub use error_fuzz::{error_text, errors_equivalent, is_error_value, normalize_error_message};
pub use policy::ComparePolicy;
