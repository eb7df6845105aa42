use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("ulpsim-{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn ulpsim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ulpsim"))
        .args(args)
        .output()
        .expect("Failed to execute ulpsim")
}

const RUN_ARG: &str = "C_ARG +fuse3_2=0x1a\nC_ARG +=fuse3_0=0x5\nSIM_ARGS=+BOOT_INTERNAL\n";

#[test]
fn test_cli_help() {
    let output = ulpsim(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("ULPSim"));
}

#[test]
fn test_cli_missing_boot_args_is_fatal() {
    let output = ulpsim(&["--boot-args", "/nonexistent/ulpsim/run.arg"]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_script_run() {
    let dir = temp_dir("script");
    std::fs::write(dir.join("run.arg"), RUN_ARG).unwrap();
    std::fs::write(
        dir.join("script.yaml"),
        r#"
schema_version: "1.0"
inputs:
  boot_args: "run.arg"
steps:
  - write_str: 0x30000100
    text: "val=%d end"
  - write_words: 0x30000000
    words: [0x30000100, 42]
  - write: 0x3004EFF0
    value: 0x41
  - write: 0x3004EFF0
    value: 0x30000000
  - write: 0x3004EFF0
    value: 0
  - read: 0x37010808
    expect: 0x1a
  - read: 0x37010800
    expect: 0x5
  - read: 0x3704012C
    expect: 0xFFFFFFFF
  - read: 0x3802AC00
    expect: 0
  - read: 0x3802AC00
    expect: 1
  - read: 0x380250A0
    expect: 0x80000000
assertions:
  - debug_contains: "val=42 end"
  - fuse: 26
    equals: 0x1a
"#,
    )
    .unwrap();

    let result_path = dir.join("result.json");
    let snapshot_path = dir.join("snapshot.json");
    let output = ulpsim(&[
        "--script",
        dir.join("script.yaml").to_str().unwrap(),
        "--no-debug-stdout",
        "--output",
        result_path.to_str().unwrap(),
        "--snapshot",
        snapshot_path.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result_path).unwrap()).unwrap();
    assert_eq!(result["status"], "pass");
    assert_eq!(result["debug_output"], "val=42 end");
    assert_eq!(result["board"], "imx8ulp-m33");
    assert_eq!(result["boot_args_sha256"].as_str().unwrap().len(), 64);
    assert_eq!(result["accesses"]["reads"], 6);
    assert_eq!(result["accesses"]["writes"], 5);

    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot_path).unwrap()).unwrap();
    let peripherals = snapshot["peripherals"].as_array().unwrap();
    assert_eq!(peripherals.len(), 5);
    assert_eq!(peripherals[4][0], "tstmr");
    assert_eq!(peripherals[4][1]["fields"][0]["words"][0], 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_failed_expectation() {
    let dir = temp_dir("fail");
    std::fs::write(dir.join("run.arg"), RUN_ARG).unwrap();
    std::fs::write(
        dir.join("script.yaml"),
        r#"
schema_version: "1.0"
inputs:
  boot_args: "run.arg"
steps:
  - read: 0x3802B008
    expect: 0
"#,
    )
    .unwrap();

    let result_path = dir.join("result.json");
    let output = ulpsim(&[
        "--script",
        dir.join("script.yaml").to_str().unwrap(),
        "--output",
        result_path.to_str().unwrap(),
    ]);
    assert!(!output.status.success());

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result_path).unwrap()).unwrap();
    assert_eq!(result["status"], "fail");
    assert_eq!(result["failures"].as_array().unwrap().len(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_mailbox_reset_halts() {
    let dir = temp_dir("reset");
    std::fs::write(dir.join("run.arg"), RUN_ARG).unwrap();
    std::fs::write(
        dir.join("script.yaml"),
        r#"
schema_version: "1.0"
inputs:
  boot_args: "run.arg"
steps:
  - write: 0x37040200
    value: 0x17C70506
  - read: 0x3802B008
    expect: 0
"#,
    )
    .unwrap();

    let result_path = dir.join("result.json");
    let output = ulpsim(&[
        "--script",
        dir.join("script.yaml").to_str().unwrap(),
        "--output",
        result_path.to_str().unwrap(),
    ]);
    // The reset ends the process cleanly before the failing read is reached.
    assert!(output.status.success());
    assert!(!result_path.exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_builtin_mysoc_board() {
    let dir = temp_dir("mysoc");
    std::fs::write(dir.join("run.arg"), "").unwrap();
    std::fs::write(
        dir.join("script.yaml"),
        r#"
schema_version: "1.0"
inputs:
  boot_args: "run.arg"
  board: "mysoc_evb"
steps:
  - read: 0x40001000
    expect: 0x54
  - read: 0x40001018
    expect: 0x50
  - write: 0x4000101C
    value: 0x99
  - read: 0x4000101C
    expect: 0x99
"#,
    )
    .unwrap();

    let result_path = dir.join("result.json");
    let output = ulpsim(&[
        "--script",
        dir.join("script.yaml").to_str().unwrap(),
        "--output",
        result_path.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result_path).unwrap()).unwrap();
    assert_eq!(result["board"], "mysoc_evb");

    // The board only runs its own CPU.
    let output = ulpsim(&[
        "--script",
        dir.join("script.yaml").to_str().unwrap(),
        "--cpu",
        "cortex-m33",
    ]);
    assert!(!output.status.success());

    let _ = std::fs::remove_dir_all(&dir);
}
