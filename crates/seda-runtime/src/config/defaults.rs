//! Compile-time defaults, generated by build.rs (see `SEDA_CONFIG_RS`).

include!(concat!(env!("OUT_DIR"), "/seda_defaults.rs"));
