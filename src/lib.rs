pub mod consensus;
pub mod metrics;
pub mod network;
pub mod primitives;
pub mod state;
pub mod storage;
pub mod txpool;

#[cfg(test)]
pub mod test;
