pub mod acled;
pub mod flee;
