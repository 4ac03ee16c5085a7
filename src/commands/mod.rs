pub mod serve;
pub mod top;
