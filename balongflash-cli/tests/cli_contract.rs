//! Integration tests for core CLI contract behavior.

use {
    balongflash::PartitionEntry,
    predicates::prelude::*,
    std::{fs, path::Path},
    tempfile::tempdir,
};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("balongflash")
}

/// Offset of the first header's CRC field in a container built by `container`.
const FIRST_CRC_OFFSET: usize = 0x5C + 0x5C;

fn record(code: u32, body: &[u8]) -> Vec<u8> {
    let mut entry = PartitionEntry::raw(code, body.to_vec());
    entry.header.blocksize = 4096;
    entry.refresh_checksums();
    entry.record_bytes()
}

/// Firmware container with an M3Boot and a Kernel partition.
fn container() -> Vec<u8> {
    let mut data = vec![0u8; 0x5C];
    data[0] = 1;
    for rec in [record(0x20000, &[0x11; 5000]), record(0x30000, &[0x22; 300])] {
        data.extend_from_slice(&rec);
        while data.len() % 4 != 0 {
            data.push(0);
        }
    }
    data
}

fn write_container(dir: &Path, corrupt: bool) -> std::path::PathBuf {
    let mut data = container();
    if corrupt {
        data[FIRST_CRC_OFFSET] ^= 0xFF;
    }
    let path = dir.join("update.bin");
    fs::write(&path, data).expect("write container");
    path
}

// ============================================================================
// Help / version
// ============================================================================

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("balongflash"))
        .stdout(predicate::str::contains("Usage"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("balongflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd().arg("--help").assert().success().get_output().clone();
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(!stdout.contains("\x1b["), "Colors should be disabled in non-TTY mode");
}

#[test]
fn non_interactive_environment_variable_works() {
    cli_cmd()
        .env("BALONGFLASH_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// Exit code 2: usage errors
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_invalid_flag() {
    cli_cmd().arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_missing_firmware() {
    cli_cmd()
        .arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("FIRMWARE"));
}

#[test]
fn exit_code_two_for_bad_sign_mode() {
    cli_cmd()
        .args(["flash", "update.bin", "--sign", "*,9,100"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("signature"));
}

#[test]
fn exit_code_two_for_dload_id_out_of_range() {
    cli_cmd()
        .args(["flash", "update.bin", "--dload-id", "9"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unknown_command_suggests_similar() {
    cli_cmd()
        .arg("falsh")
        .assert()
        .failure()
        .stderr(predicate::str::contains("flash"));
}

// ============================================================================
// Exit code 1: generic failures
// ============================================================================

#[test]
fn exit_code_one_for_missing_file() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd()
        .arg("info")
        .arg(dir.path().join("does_not_exist.bin"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn info_on_garbage_reports_missing_image() {
    let dir = tempdir().expect("tempdir should be created");
    let path = dir.path().join("garbage.bin");
    fs::write(&path, vec![0xAB; 4096]).expect("write garbage");

    cli_cmd()
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does not contain a firmware image"));
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd()
        .args(["info", "--json"])
        .arg(dir.path().join("not_exists.bin"))
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

// ============================================================================
// Exit code 3: configuration errors
// ============================================================================

#[test]
fn invalid_local_config_only_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("balongflash.toml"), "invalid toml [[[").expect("write config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("fw-types")
        .output()
        .expect("command should execute");
    assert!(output.status.success(), "invalid config must not be fatal");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn exit_code_three_for_bad_signature_in_config() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), false);
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[flash]\nsignature = \"bogus\"\n").expect("write config");

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .arg("flash")
        .arg(&firmware)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("flash.signature"));
}

// ============================================================================
// Exit code 4: device not found
// ============================================================================

#[cfg(unix)]
#[test]
fn exit_code_four_for_missing_port() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), false);

    cli_cmd()
        .args(["-p", "/dev/balongflash-no-such-port", "flash"])
        .arg(&firmware)
        .assert()
        .failure()
        .code(4);
}

// ============================================================================
// Exit code 5: validation refused
// ============================================================================

#[test]
fn exit_code_five_for_corrupt_firmware() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), true);

    cli_cmd()
        .args(["-p", "/dev/balongflash-no-such-port", "flash"])
        .arg(&firmware)
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn split_refuses_corrupt_firmware_unless_forced() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), true);
    let out = dir.path().join("parts");

    cli_cmd()
        .arg("split")
        .arg(&firmware)
        .arg(&out)
        .assert()
        .failure()
        .code(5);
    assert!(!out.exists());

    cli_cmd()
        .arg("split")
        .arg(&firmware)
        .arg(&out)
        .arg("--force")
        .assert()
        .success();
    assert!(out.join("00-00020000-M3Boot.bin").exists());
}

// ============================================================================
// Working commands
// ============================================================================

#[test]
fn info_lists_partitions() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), false);

    cli_cmd()
        .arg("info")
        .arg(&firmware)
        .assert()
        .success()
        .stderr(predicate::str::contains("M3Boot"))
        .stderr(predicate::str::contains("Kernel"))
        .stderr(predicate::str::contains("ONLY_FW"));
}

#[test]
fn info_json_is_valid() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), false);

    let output = cli_cmd()
        .args(["info", "--json"])
        .arg(&firmware)
        .assert()
        .success()
        .get_output()
        .clone();

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["ok"], true);
    assert_eq!(json["data"]["partition_count"], 2);
    assert_eq!(json["data"]["firmware_type"], 1);
    assert_eq!(json["data"]["partitions"][1]["name"], "Kernel");
    assert_eq!(json["data"]["partitions"][0]["size"], 5000);
}

#[test]
fn split_writes_raw_and_header_files() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), false);

    let raw = dir.path().join("raw");
    cli_cmd()
        .arg("split")
        .arg(&firmware)
        .arg(&raw)
        .assert()
        .success();
    let kernel = fs::read(raw.join("01-00030000-Kernel.bin")).expect("kernel image");
    assert_eq!(kernel, vec![0x22; 300]);

    let full = dir.path().join("full");
    cli_cmd()
        .arg("split")
        .arg(&firmware)
        .arg(&full)
        .arg("--with-headers")
        .assert()
        .success();
    assert!(full.join("00-00020000-M3Boot.fw").exists());
}

#[test]
fn info_reads_split_directory() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = write_container(dir.path(), false);
    let parts = dir.path().join("parts");

    cli_cmd()
        .arg("split")
        .arg(&firmware)
        .arg(&parts)
        .assert()
        .success();

    cli_cmd()
        .args(["info", "--dir"])
        .arg(&parts)
        .assert()
        .success()
        .stderr(predicate::str::contains("Kernel"));
}

#[test]
fn fw_types_lists_descriptions() {
    cli_cmd()
        .arg("fw-types")
        .assert()
        .success()
        .stdout(predicate::str::contains("ONLY_FW"))
        .stdout(predicate::str::contains("FW_ISO_WEBUI"));
}

#[test]
fn sign_presets_lists_table() {
    cli_cmd()
        .arg("sign-presets")
        .assert()
        .success()
        .stdout(predicate::str::contains("2958"))
        .stdout(predicate::str::contains("Firmware+ISO+webinterface"));
}

#[test]
fn completions_command_writes_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_balongflash()"));
}

#[test]
fn list_ports_json_is_enveloped() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    if output.status.success() {
        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
        assert_eq!(json["ok"], true);
        assert!(json["data"]["ports"].is_array());
    } else {
        // No port enumeration backend in this environment
        assert!(output.stdout.is_empty());
    }
}
