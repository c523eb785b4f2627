//! Build script: render the dockyardd(8) manual page for packaging.

use std::env;

use camino::Utf8PathBuf;
use dockyard_build_util::{ManPage, generated_man_dir, manual_date, write_atomically};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=CARGO_PKG_VERSION");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=TARGET");
    println!("cargo:rerun-if-env-changed=PROFILE");

    let version = env::var("CARGO_PKG_VERSION").map_err(
        |_| "CARGO_PKG_VERSION must be set by Cargo; cannot render manual page without it.",
    )?;
    let mut warnings = Vec::new();
    let date = manual_date(env::var("SOURCE_DATE_EPOCH").ok().as_deref(), &mut warnings);
    for warning in warnings {
        println!("cargo:warning={warning}");
    }

    let page = ManPage::new("dockyardd", version, date)
        .summary("Dockyard container daemon")
        .paragraph(
            "dockyardd validates its configuration, builds the command kernel and \
             registers the built-in subsystems, then initialises storage, networking \
             and the execution backend in the background while the API sockets come \
             up. Requests are accepted only once initialisation has succeeded.",
        )
        .paragraph(
            "SIGINT and SIGTERM run an orderly teardown bounded by the shutdown grace \
             period. SIGQUIT exits immediately.",
        )
        .env("DOCKYARD_ROOT", "Root directory for daemon state.")
        .env("DOCKYARD_PIDFILE", "Path of the pidfile.")
        .env("DOCKYARD_EXEC_DRIVER", "Execution backend: native or lxc.")
        .env("DOCKYARD_BRIDGE_IFACE", "Bridge to attach containers to; none disables networking.")
        .env("DOCKYARD_HOSTS", "API listen sockets, unix://path or tcp://host:port.")
        .env("DOCKYARD_LOG_FILTER", "tracing filter expression.")
        .env("DOCKYARD_LOG_FORMAT", "json or compact.")
        .file("/var/run/dockyard.pid", "Default pidfile.")
        .file("/var/run/dockyard.sock", "Default API socket.")
        .file("/var/lib/dockyard", "Default state root.");
    let rendered = page.render();
    let name = page.file_name();

    let out_dir = env::var("OUT_DIR").ok().map(Utf8PathBuf::from);
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown-target".into());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown-profile".into());
    let man_dir = generated_man_dir(out_dir.as_deref(), &target, &profile);
    write_atomically(&man_dir, &name, rendered.as_bytes())?;

    if let Some(out_dir) = out_dir {
        if let Err(error) = write_atomically(&out_dir, &name, rendered.as_bytes()) {
            println!("cargo:warning=Failed to stage manual page in OUT_DIR ({out_dir}): {error}");
        }
    }
    Ok(())
}
