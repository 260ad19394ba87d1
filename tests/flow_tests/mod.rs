//! Stories about running `certify` end to end
//!
//! - `issuance`: successful runs, including replacement of an existing secret
//! - `failures`: denial, timeout, cancellation and storage errors, none of
//!   which may leave a half-written secret behind

mod fakes;
