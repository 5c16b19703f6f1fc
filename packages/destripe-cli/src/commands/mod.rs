pub mod detect;
pub mod info;
pub mod run;
pub mod validate;
