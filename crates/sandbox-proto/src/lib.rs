pub mod sandbox_io {
    pub mod v1 {
        tonic::include_proto!("sandbox_io.v1");
    }
}
