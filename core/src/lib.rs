pub mod tensor;
pub mod codec;
pub mod sample;
pub mod partition;
pub mod phase;
pub mod cell;
pub mod gradient;
pub mod tanh_cell;
pub mod block;
pub mod sequence;
pub mod runner;
pub mod config;
pub mod persist;
