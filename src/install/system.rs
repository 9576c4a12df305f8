use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::process::Command;

const BIN_DEST: &str = "/usr/local/bin/pingwatch";
const UNIT_PATH: &str = "/etc/systemd/system/pingwatch.service";
const SERVICE: &str = "pingwatch.service";
const STATE_DIRS: [&str; 2] = ["/var/lib/pingwatch", "/var/lib/private/pingwatch"];

fn require_root(action: &str) -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        return Err(Error::Install(format!(
            "{} must be run as root (e.g., with sudo)",
            action
        )));
    }
    Ok(())
}

fn systemctl(args: &[&str]) -> bool {
    Command::new("systemctl")
        .args(args)
        .status()
        .map(|st| st.success())
        .unwrap_or(false)
}

/// systemd unit running the daemon with just enough privilege to bind NFLOG.
pub fn unit_file(bin: &str, nflog_group: u16, max_entries: usize) -> String {
    format!(
        r#"[Unit]
Description=Pingwatch ICMP echo logger
After=network.target

[Service]
Type=notify
ExecStart={} --nflog-group {} --max-entries {}
DynamicUser=yes
StateDirectory=pingwatch
RuntimeDirectory=pingwatch
AmbientCapabilities=CAP_NET_ADMIN
CapabilityBoundingSet=CAP_NET_ADMIN
Restart=on-failure

[Install]
WantedBy=multi-user.target
"#,
        bin, nflog_group, max_entries
    )
}

/// Run the install flow for pingwatch.
pub fn install(overwrite: bool, nflog_group: u16, max_entries: usize) -> Result<()> {
    require_root("Install")?;

    // 1. Copy binary to /usr/local/bin/pingwatch, stopping the service first when replacing it.
    let exe_path = fs::read_link("/proc/self/exe")?;
    if Path::new(BIN_DEST).exists() && !overwrite {
        return Err(Error::Install(format!(
            "Binary {} already exists. Use --overwrite to replace.",
            BIN_DEST
        )));
    }
    if overwrite && systemctl(&["is-active", "--quiet", SERVICE]) {
        systemctl(&["stop", SERVICE]);
    }
    fs::copy(&exe_path, BIN_DEST)?;

    // 2. Write the unit file
    if Path::new(UNIT_PATH).exists() && !overwrite {
        return Err(Error::Install(format!(
            "Unit {} already exists. Use --overwrite to replace.",
            UNIT_PATH
        )));
    }
    let mut unit = File::create(UNIT_PATH)?;
    unit.write_all(unit_file(BIN_DEST, nflog_group, max_entries).as_bytes())?;

    // 3. Reload systemd and enable/start service
    systemctl(&["daemon-reload"]);
    if !systemctl(&["enable", "--now", SERVICE]) {
        return Err(Error::Install(format!("failed to enable {}", SERVICE)));
    }

    println!("Pingwatch installed and started. Route echo requests to it with:");
    println!(
        "  iptables -I INPUT -p icmp -m icmp --icmp-type 8 -j NFLOG --nflog-group {}",
        nflog_group
    );
    println!(
        "  ip6tables -I INPUT -p icmpv6 -m icmpv6 --icmpv6-type 128 -j NFLOG --nflog-group {}",
        nflog_group
    );
    Ok(())
}

/// Run the uninstall flow. If `purge` is set, remove everything; otherwise just stop/disable service.
pub fn uninstall(purge: bool) -> Result<()> {
    require_root("Uninstall")?;

    systemctl(&["stop", SERVICE]);
    systemctl(&["disable", SERVICE]);

    if purge {
        let _ = fs::remove_file(UNIT_PATH);
        systemctl(&["daemon-reload"]);
        let _ = fs::remove_file(BIN_DEST);
        for dir in STATE_DIRS {
            let _ = fs::remove_dir_all(dir);
        }
        println!("Pingwatch service, binary and recorded state purged.");
    } else {
        println!("Pingwatch service stopped and disabled. (binary and state left intact)");
    }
    Ok(())
}
