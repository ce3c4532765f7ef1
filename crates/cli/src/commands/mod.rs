pub mod agify;
pub mod simulate;
