//! Arbitrage detection engine
//!
//! Features:
//! - Triangular arbitrage within one exchange
//! - Spatial arbitrage across exchange pairs
//! - Parallel strategy evaluation with rayon
//! - Bounded drop-oldest opportunity sink

pub mod scanner;
pub mod sink;
pub mod strategies;

pub use scanner::{ArbitrageScanner, ScannerConfig, ScannerStats};
pub use sink::OpportunitySink;
pub use strategies::{
    DetectionContext, SpatialStrategy, SpatialTarget, Strategy, TriangleTarget, TriangularStrategy,
};
