//! Step-dependent coefficient schedules.
//!
//! Learning rates, the entropy scale and the actor gradient mix are given as
//! schedule strings and evaluated against the global step.
//!
//! ## Formats
//!
//! - `"3e-4"`: constant
//! - `"linear(a,b,d)"`: linear interpolation from `a` to `b` over `d` steps
//! - `"warmup(w,v)"`: ramp from 0 to `v` over `w` steps
//! - `"exp(a,b,h)"`: decay from `a` towards `b` with half-life `h`
//! - `"horizon(a,b,d)"`: `1 - 1/h` for a horizon `h` interpolated linearly
//!
//! ## Example
//!
//! ```rust,ignore
//! use dreamer_rl::scheduling::Schedule;
//!
//! let ent: Schedule = "linear(3e-3,3e-4,2.5e6)".parse()?;
//! let scale = ent.value(step.get());
//! ```

pub mod schedule;


pub use schedule::{schedule, Schedule};
