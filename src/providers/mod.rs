pub mod twitter;

pub use twitter::TwitterProvider;
