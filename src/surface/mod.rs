pub mod server;

pub use server::SurfaceServer;
