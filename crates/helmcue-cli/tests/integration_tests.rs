//! Integration tests for CLI commands.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tempfile::TempDir;

/// Helper to run helmcue and capture output.
fn helmcue(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_helmcue"))
        .args(args)
        .output()
        .expect("failed to execute helmcue")
}

fn helmcue_with_stdin(args: &[&str], stdin: &str) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_helmcue"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn helmcue");
    child
        .stdin
        .as_mut()
        .expect("stdin piped")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait for helmcue")
}

fn create_test_chart(dir: &Path) {
    fs::create_dir_all(dir.join("templates")).unwrap();

    fs::write(
        dir.join("Chart.yaml"),
        "apiVersion: v2\nname: demo\nversion: 0.1.0\n",
    )
    .unwrap();

    fs::write(
        dir.join("values.yaml"),
        "replicaCount: 1\n",
    )
    .unwrap();

    fs::write(
        dir.join("templates/configmap.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ .Release.Name }}\ndata:\n  replicas: {{ .Values.replicaCount | default 1 | quote }}\n",
    )
    .unwrap();
}

mod template_command {
    use super::*;

    #[test]
    fn converts_stdin_to_stdout() {
        let output = helmcue_with_stdin(&["template"], "name: {{ .Values.name }}\n");
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("name: #values.name"));
        assert!(stdout.contains("#values: {"));
    }

    #[test]
    fn converts_file_argument() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("input.yaml");
        fs::write(&file, "port: {{ .Values.port }}\n").unwrap();

        let output = helmcue(&["template", file.to_str().unwrap()]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("port: #values.port"));
    }

    #[test]
    fn helm_flag_enables_sprig_functions() {
        // quote is a Sprig function: rejected in plain template mode,
        // accepted with --helm.
        let input = "name: {{ .Values.name | quote }}\n";

        let plain = helmcue_with_stdin(&["template"], input);
        assert!(!plain.status.success());
        assert_eq!(plain.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&plain.stderr).contains("quote"));

        let helm = helmcue_with_stdin(&["template", "--helm"], input);
        assert!(helm.status.success(), "stderr: {}", String::from_utf8_lossy(&helm.stderr));
        assert!(String::from_utf8_lossy(&helm.stdout).contains("\"\\(#values.name)\""));
    }

    #[test]
    fn rejects_multiple_template_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        fs::write(&a, "a: 1\n").unwrap();
        fs::write(&b, "b: 2\n").unwrap();

        let output = helmcue(&["template", a.to_str().unwrap(), b.to_str().unwrap()]);
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("multiple template files"));
    }

    #[test]
    fn helpers_are_passed_through() {
        let dir = TempDir::new().unwrap();
        let helper = dir.path().join("_helpers.tpl");
        let tmpl = dir.path().join("main.yaml");
        fs::write(&helper, "{{- define \"app.name\" }}demo{{- end }}").unwrap();
        fs::write(&tmpl, "name: {{ include \"app.name\" . }}\n").unwrap();

        let output = helmcue(&[
            "template",
            "--helm",
            helper.to_str().unwrap(),
            tmpl.to_str().unwrap(),
        ]);
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("name: _app_name"));
        assert!(stdout.contains("_app_name: \"demo\""));
    }
}

mod chart_command {
    use super::*;

    #[test]
    fn converts_chart_directory() {
        let chart = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        create_test_chart(chart.path());
        let out_dir = out.path().join("module");

        let output = helmcue(&[
            "chart",
            chart.path().to_str().unwrap(),
            out_dir.to_str().unwrap(),
        ]);
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        assert!(out_dir.join("values.cue").exists());
        assert!(out_dir.join("configmap.cue").exists());
        assert!(out_dir.join("results.cue").exists());

        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("1/1"), "stderr: {stderr}");
    }

    #[test]
    fn missing_chart_fails_with_exit_one() {
        let out = TempDir::new().unwrap();
        let output = helmcue(&["chart", "/nonexistent/chart", out.path().to_str().unwrap()]);
        assert!(!output.status.success());
        assert_eq!(output.status.code(), Some(1));
    }
}

mod version_command {
    use super::*;

    #[test]
    fn prints_version() {
        let output = helmcue(&["version"]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("helmcue version"));
    }
}
