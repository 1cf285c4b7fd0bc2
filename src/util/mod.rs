pub mod connectivity;
pub mod io;
pub mod log;
pub mod poll;
