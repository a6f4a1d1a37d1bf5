pub mod banded;
pub mod candidates;
pub mod overcut;
pub mod report;
pub mod resolver;
pub mod timeline;
pub mod tokenization;
