//! Numeric tower below the object runtime: arbitrary-precision integers,
//! modular reduction and primality.
mod bigint;
mod modular;
mod prime;

pub use bigint::BigInt;
pub use modular::{Barrett, Montgomery, mod_inverse, mod_pow};
pub use prime::is_probable_prime;
