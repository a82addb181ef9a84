pub mod git;
pub mod paths;
pub mod redact;
