use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

#[test]
fn dispatch_smoke_covers_every_method() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["version"].is_string());

    let unknown = request(&mut stdin, &mut reader, "2", "definitely.not.here", json!({}));
    assert_eq!(unknown["ok"], json!(false));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    let no_path = request(&mut stdin, &mut reader, "3", "analyze", json!({}));
    assert_eq!(no_path["error"]["code"], json!("bad_params"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "analyze",
        json!({ "path": "/nonexistent/marks.xlsx" }),
    );
    assert_eq!(missing["error"]["code"], json!("workbook_open_failed"));

    let no_rows = request(&mut stdin, &mut reader, "5", "analyze.grid", json!({}));
    assert_eq!(no_rows["error"]["code"], json!("bad_params"));

    let analyzed = request(
        &mut stdin,
        &mut reader,
        "6",
        "analyze.grid",
        json!({
            "rows": [
                ["S.N.", "USN", "NAME", "CIE", "SEE"],
                [1, "1XX21CS001", "Alice", 45, 30]
            ]
        }),
    );
    assert_eq!(analyzed["ok"], json!(true));
    assert_eq!(analyzed["result"]["totalStudents"], json!(1));

    let template = request(
        &mut stdin,
        &mut reader,
        "7",
        "template.generate",
        json!({
            "academicYear": "2024-25",
            "branch": "CSE",
            "semester": "3",
            "courses": [{ "courseCode": "BCS101", "courseTitle": "DS", "courseType": "Theory" }],
            "students": [{ "usn": "1XX21CS001", "name": "Alice" }]
        }),
    );
    assert_eq!(template["ok"], json!(true));
    assert_eq!(
        template["result"]["sheets"][0]["name"],
        json!("Result Template")
    );

    let exported = request(
        &mut stdin,
        &mut reader,
        "8",
        "export.grid",
        json!({
            "students": analyzed["result"]["students"].clone(),
            "courseTypes": analyzed["result"]["courseTypes"].clone()
        }),
    );
    assert_eq!(exported["ok"], json!(true));
    assert!(exported["result"]["rows"].as_array().unwrap().len() >= 2);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_json_line_gets_a_bad_json_reply() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "this is not json").expect("write garbage");
    stdin.flush().expect("flush");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    // the loop keeps serving after a bad line
    let payload = json!({ "id": "next", "method": "health", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], json!(true));

    drop(stdin);
    let _ = child.wait();
}
