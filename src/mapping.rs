pub mod descriptor;
pub mod repository;
pub mod transformer;
