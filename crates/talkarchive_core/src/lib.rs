pub mod archive;
pub mod config;
pub mod decision;
pub mod mediawiki;
pub mod review;
pub mod sections;
pub mod template;
pub mod timestamp;
