pub mod mobilenet;
pub mod model;
