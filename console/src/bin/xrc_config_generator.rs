use clap::Parser;
use xrc_console::GeneratorCli;

const TEMPLATE: &str = r#"# X-ray acquisition console configuration.
# Unknown keys are rejected at load time.

# Registered organization UID root. Required; there is no fallback.
uid_root = "1.3.6.1.4.1.99999.1"
# Numeric device serial, second component of every generated UID.
device_serial = "4711"
# Our calling AE title.
local_aet = "XRC1"
# How long a storage-commitment answer may take before the operator is told.
commitment_timeout_ms = 300000

[[pacs_destinations]]
name = "pacs1"
aet = "PACS"
host = "10.0.0.5"
port = 11112
# TLS requires [tls] material below; there is no plaintext fallback.
tls = false
mutual_tls = false
# Also export presentation states to this destination.
send_gsps = false

[worklist_scp]
name = "ris-worklist"
aet = "RISWL"
host = "10.0.0.6"
port = 11112

[mpps_scp]
name = "ris-mpps"
aet = "RISPPS"
host = "10.0.0.6"
port = 11113

[tls]
# ca = "/etc/xrc/ca.pem"
# client_cert = "/etc/xrc/client.pem"
# client_key = "/etc/xrc/client.key"
min_version = "1.2"

[pool]
max_size = 4
acquisition_timeout_ms = 30000
idle_eviction_ms = 60000

[retry]
initial_ms = 30000
multiplier = 2.0
max_ms = 3600000
max_attempts = 5

[dose_limits]
# cGy.cm2
study = 500.0
daily = 1000.0
warn_pct = 80

[safety_limits]
max_kvp = 150.0
max_ma = 500.0
max_ms = 2000.0

[paths]
data_dir = "/var/lib/xrc"
"#;

fn main() -> anyhow::Result<()> {
    let cli = GeneratorCli::parse();
    std::fs::write(&cli.output, TEMPLATE)?;
    println!("Wrote {}", cli.output.display());
    Ok(())
}
