pub mod deploy;
pub mod features;
pub mod ideal;
pub mod push;
