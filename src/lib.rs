pub mod config;

// CORE
pub mod core {
    pub mod event {
        pub mod dispatcher;
    }
    pub mod protocol {
        pub mod error;
        pub mod acceleration {
            pub mod features;
            pub mod multi_buffer;
            pub mod portable;
            pub mod reference;
        }
        pub mod shared_key {
            pub mod types;
            pub mod context;
            pub mod queue;
            pub mod stats;
            pub mod connection;
            pub mod provider;
        }
    }
    pub mod monitoring {
        pub mod logger;
    }
}
