#[path = "../support/mod.rs"]
mod support;

mod control;
mod framing;
