pub mod audit;
pub mod config;
pub mod index;
pub mod journal;
pub mod lock;
pub mod manifest;
pub mod paths;
pub mod report;
pub mod resolver;
pub mod rewrite;
pub mod scan;
pub mod session;
pub mod similarity;
pub mod undo;
pub mod util;
pub mod warn;
