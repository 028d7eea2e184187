//! Integration tests against in-memory remote fakes

mod fakes;
mod test_config;
mod test_fsm;
mod test_transfer;
