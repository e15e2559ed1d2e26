//! Build script for compile-time configuration injection.
//!
//! Set environment variables before building to configure the firmware:
//!
//!   GATE_SSID=MyWiFi \
//!   GATE_PASSWORD=secret123 \
//!   GATE_NUMBER=+3612345678 \
//!   OWNER_NUMBER=+36201234567 \
//!   ALLOWED_CALLERS=+36201234567,+36301112222 \
//!   SIM_PIN=0000 \
//!   cargo build --release

fn main() {
    // Re-run build script if these environment variables change
    println!("cargo::rerun-if-env-changed=GATE_SSID");
    println!("cargo::rerun-if-env-changed=GATE_PASSWORD");
    println!("cargo::rerun-if-env-changed=GATE_NUMBER");
    println!("cargo::rerun-if-env-changed=OWNER_NUMBER");
    println!("cargo::rerun-if-env-changed=ALLOWED_CALLERS");
    println!("cargo::rerun-if-env-changed=SIM_PIN");
}
