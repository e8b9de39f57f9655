pub mod arrayvec;
pub mod boxedarray;
pub mod frontend;
pub mod num;
pub mod timeutils;
