pub mod aggregate;
pub mod backend;
pub mod cancel;
pub mod compare;
pub mod plan;
pub mod submit;
pub mod sweep;
pub mod track;
