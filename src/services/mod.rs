pub mod backend;
pub mod corrections;
pub mod extractor;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod report_codec;
pub mod storage;
pub mod tokens;
pub mod validation;
