// watchroom-common: wire protocol and shared types for watch-together rooms

pub mod protocol;
pub mod types;
