//! Build script for seda-runtime
//!
//! Handles configuration merging:
//! 1. Start with library defaults
//! 2. If SEDA_CONFIG_RS env var is set, parse user's config file
//! 3. Merge user values over defaults (user wins)
//! 4. Generate OUT_DIR/seda_defaults.rs
//!
//! User only needs to specify values they want to change.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Configuration parameter definition
struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

/// All configuration parameters with their defaults
const CONFIG_PARAMS: &[ConfigParam] = &[
    // Event loop
    ConfigParam {
        name: "LOOP_MAX_HANDLES",
        rust_type: "usize",
        default_value: "1024",
    },
    ConfigParam {
        name: "LOOP_IO_VECTORS",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        name: "LOOP_MAX_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "100",
    },
    ConfigParam {
        name: "LOOP_EDGE_TRIGGERED",
        rust_type: "bool",
        default_value: "false",
    },
    ConfigParam {
        name: "LOOP_TIMER_CAPACITY",
        rust_type: "usize",
        default_value: "4096",
    },
    ConfigParam {
        name: "LOOP_INJECT_CAPACITY",
        rust_type: "usize",
        default_value: "1024",
    },
    ConfigParam {
        name: "LOOP_INJECT_EVENT_SIZE",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        name: "LOOP_COMMAND_CAPACITY",
        rust_type: "usize",
        default_value: "256",
    },
    // Stage
    ConfigParam {
        name: "STAGE_THREADS",
        rust_type: "usize",
        default_value: "4",
    },
    ConfigParam {
        name: "STAGE_QUEUE_CAPACITY",
        rust_type: "usize",
        default_value: "1024",
    },
    ConfigParam {
        name: "STAGE_EVENT_SIZE",
        rust_type: "usize",
        default_value: "128",
    },
    ConfigParam {
        name: "STAGE_TIMEDWAIT_US",
        rust_type: "u64",
        default_value: "10_000",
    },
    ConfigParam {
        name: "STAGE_TIMEDWAIT_SIGNAL",
        rust_type: "bool",
        default_value: "true",
    },
    ConfigParam {
        name: "STAGE_BATCH_SIZE",
        rust_type: "usize",
        default_value: "64",
    },
    ConfigParam {
        name: "STAGE_PRIORITY",
        rust_type: "bool",
        default_value: "false",
    },
    ConfigParam {
        name: "STAGE_SHARED_QUEUE",
        rust_type: "bool",
        default_value: "false",
    },
    ConfigParam {
        name: "STAGE_IDLE",
        rust_type: "bool",
        default_value: "false",
    },
    ConfigParam {
        name: "STAGE_TIMER",
        rust_type: "bool",
        default_value: "true",
    },
    ConfigParam {
        name: "STAGE_TIMER_CAPACITY",
        rust_type: "usize",
        default_value: "1024",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("seda_defaults.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("SEDA_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                parse_and_merge(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read SEDA_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=SEDA_CONFIG_RS");
    println!("cargo:rerun-if-changed=build.rs");

    let output = generate_config(&config);
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Merge `pub const NAME: TYPE = VALUE;` lines over the defaults.
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || !line.starts_with("pub const ") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// Parse `pub const NAME: TYPE = VALUE;` into (name, value)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();
    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();
    Some((name, value))
}

fn generate_config(config: &HashMap<&str, String>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Defaults merged from library values");
    if env::var("SEDA_CONFIG_RS").is_ok() {
        output.push_str(" and SEDA_CONFIG_RS");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}
