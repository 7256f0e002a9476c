use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("netdevgen")?;
    cmd.arg("--help");
    cmd.assert().success();
    Ok(())
}

#[test]
fn default_template() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("netdevgen")?;
    let output = cmd.arg("template").output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    // 50 bytes
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "45 00 00 32 00 00 00 00 0c 11 00 00 ac 10 00 01"
    );
    assert!(lines[1].starts_with("ac 10 00 02 00"));
    assert_eq!(lines[3], "00 00");
    Ok(())
}

#[test]
fn template_from_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = dir.path().join("netdevgen.toml");
    fs::write(
        &config_path,
        r#"
packet_length = 20
source = "10.10.1.1"
destination = "10.10.1.2"
"#,
    )?;

    let mut cmd = Command::cargo_bin("netdevgen")?;
    let output = cmd
        .arg("template")
        .arg("-c")
        .arg(&config_path)
        .arg("-d")
        .arg("10.10.1.3")
        .output()?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?,
        "45 00 00 14 00 00 00 00 0c 11 00 00 0a 0a 01 01\n0a 0a 01 03\n"
    );
    Ok(())
}

#[test]
fn invalid_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = dir.path().join("netdevgen.toml");
    fs::write(&config_path, "max_in_flight = 0\n")?;

    let mut cmd = Command::cargo_bin("netdevgen")?;
    cmd.arg("template").arg("-c").arg(&config_path);
    cmd.assert().failure();
    Ok(())
}

#[test]
fn invalid_duration() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("netdevgen")?;
    cmd.arg("run").arg("--duration").arg("soon");
    cmd.assert().failure();
    Ok(())
}
