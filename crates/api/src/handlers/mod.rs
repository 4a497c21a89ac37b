pub mod form;
pub mod generation;
pub mod health;
