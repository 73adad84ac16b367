//! On-disk path definitions for pipeline artefacts.
//!
//! This module defines the file names elastix and the pipeline read and
//! write. It contains **no I/O logic** - only typed path construction.

pub mod elastix;
pub mod output;
pub mod patient;
