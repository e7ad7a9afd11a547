//! Route handlers, one module per resource.

pub mod assessments;
pub mod audits;
pub mod companies;
pub mod evidence;
pub mod links;
pub mod questions;
pub mod taxonomy;
