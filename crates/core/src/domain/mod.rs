pub mod approval;
pub mod document;
pub mod flow;
pub mod user;
