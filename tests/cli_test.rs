//! CLI integration tests for the edm-forms binary.

mod common;

use assert_cmd::Command;
use common::SHOP_METADATA;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("edm-forms"));
    cmd.env_remove("EDM_FORMS_ENDPOINT").env_remove("RUST_LOG");
    cmd
}

// Helper to create a temp metadata file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn shop_file(dir: &TempDir) -> String {
    write_temp_file(dir, "metadata.xml", SHOP_METADATA)
        .to_str()
        .unwrap()
        .to_string()
}

mod entities_command {
    use super::*;

    #[test]
    fn lists_entity_types() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["entities", &shop_file(&dir)])
            .assert()
            .success()
            .stdout("Customer\nOrder\nOrderLine\n");
    }

    #[test]
    fn missing_file_is_io_error() {
        cmd()
            .args(["entities", "/nonexistent/metadata.xml"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn malformed_file_is_document_error() {
        let dir = TempDir::new().unwrap();
        let path = write_temp_file(&dir, "bad.xml", "<edmx:Edmx");
        cmd()
            .args(["entities", path.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid metadata XML"));
    }
}

mod inspect_command {
    use super::*;

    #[test]
    fn prints_descriptor() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["inspect", &shop_file(&dir), "Order"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""name":"Order""#))
            .stdout(predicate::str::contains(r#""target_entity_name":"Customer""#));
    }

    #[test]
    fn unknown_entity_exits_2() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["inspect", &shop_file(&dir), "order"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("not found"));
    }
}

mod compile_command {
    use super::*;

    #[test]
    fn prints_fields_and_defaults() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["compile", &shop_file(&dir), "Order"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""kind":"select""#))
            .stdout(predicate::str::contains(r#""defaults":{"Number":"""#))
            .stdout(predicate::str::contains("TrackingGuid").not());
    }

    #[test]
    fn pretty_output_to_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("order.json");
        cmd()
            .args(["compile", &shop_file(&dir), "Customer", "--pretty", "--output"])
            .arg(&output)
            .assert()
            .success();

        let written = fs::read_to_string(&output).unwrap();
        assert!(written.contains("{\n"));
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["fields"]["Notes"]["kind"], "textarea");
    }

    #[test]
    fn resolve_options_needs_endpoint_for_files() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["compile", &shop_file(&dir), "Order", "--resolve-options"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("--endpoint"));
    }

    #[test]
    fn resolve_options_fetches_target_collection() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/odata/Customer")
            .with_status(200)
            .with_body(r#"{"value":[{"Id":1,"Name":"Acme"}]}"#)
            .create();

        cmd()
            .args(["compile", &shop_file(&dir), "Order", "--resolve-options"])
            .env("EDM_FORMS_ENDPOINT", format!("{}/odata", server.url()))
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""options":[{"value":1,"label":"Acme"}]"#));

        mock.assert();
    }

    #[test]
    fn compiles_from_service_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/odata/$metadata")
            .with_status(200)
            .with_body(SHOP_METADATA)
            .create();

        cmd()
            .args(["compile", &format!("{}/odata/$metadata", server.url()), "Customer"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""kind":"email""#));

        mock.assert();
    }
}

mod form_command {
    use super::*;

    #[test]
    fn renders_every_field() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["form", &shop_file(&dir), "Order"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Number*: \n"))
            .stdout(predicate::str::contains("Total*: 0\n"))
            .stdout(predicate::str::contains("[ ] Shipped*\n"))
            .stdout(predicate::str::contains("Customer*: <Select customer> (0 options)"));
    }

    #[test]
    fn validate_reports_missing_fields() {
        let dir = TempDir::new().unwrap();
        cmd()
            .args(["form", &shop_file(&dir), "Order", "--validate"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("! Number is required."));
    }

    #[test]
    fn validate_accepts_complete_values() {
        let dir = TempDir::new().unwrap();
        let values = write_temp_file(
            &dir,
            "values.json",
            r#"{"Id": 5, "Number": "SO-1", "Total": 10.5, "CustomerId": 1, "Shipped": true}"#,
        );
        cmd()
            .args(["form", &shop_file(&dir), "Order", "--validate", "--values"])
            .arg(&values)
            .assert()
            .success()
            .stdout(predicate::str::contains("Number*: SO-1"))
            .stdout(predicate::str::contains("[x] Shipped*"));
    }
}

mod crud_commands {
    use super::*;

    fn endpoint(server: &mockito::ServerGuard) -> String {
        format!("{}/odata", server.url())
    }

    #[test]
    fn list_prints_page() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/odata/Product")
            .match_query(mockito::Matcher::UrlEncoded("$top".into(), "1".into()))
            .with_status(200)
            .with_body(r#"{"value":[{"Id":1,"Name":"Desk"}]}"#)
            .create();

        cmd()
            .args(["list", "Product", "--top", "1", "--endpoint", &endpoint(&server)])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""Name": "Desk""#));
    }

    #[test]
    fn get_missing_exits_2() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/odata/Product(9)")
            .with_status(404)
            .create();

        cmd()
            .args(["get", "Product", "9"])
            .env("EDM_FORMS_ENDPOINT", endpoint(&server))
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Product(9) not found"));
    }

    #[test]
    fn quoted_key_stays_a_string() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/odata/Coupon('42')")
            .with_status(200)
            .with_body(r#"{"Code":"42","Percent":10}"#)
            .create();

        cmd()
            .args(["get", "Coupon", "'42'", "--endpoint", &endpoint(&server)])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""Code": "42""#));

        mock.assert();
    }

    #[test]
    fn create_validation_failure_prints_field_map() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/odata/Product")
            .with_status(400)
            .with_body(r#"{"Name":["The Name field is required."]}"#)
            .create();

        cmd()
            .args(["create", "Product", "--data", "{}", "--endpoint", &endpoint(&server)])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(
                r#""errors":{"Name":"The Name field is required."}"#,
            ))
            .stderr(predicate::str::contains("Validation failed"));
    }

    #[test]
    fn patch_reads_payload_file() {
        let dir = TempDir::new().unwrap();
        let payload = write_temp_file(&dir, "patch.json", r#"{"Price": 99}"#);
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PATCH", "/odata/Product(3)")
            .match_body(mockito::Matcher::Json(serde_json::json!({ "Price": 99 })))
            .with_status(204)
            .create();

        cmd()
            .args(["patch", "Product", "3", "--endpoint", &endpoint(&server), "--data"])
            .arg(format!("@{}", payload.display()))
            .assert()
            .success()
            .stdout(predicate::str::contains("Updated Product(3)"));

        mock.assert();
    }

    #[test]
    fn delete_confirms() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("DELETE", "/odata/Product(3)")
            .with_status(204)
            .create();

        cmd()
            .args(["delete", "Product", "3", "--endpoint", &endpoint(&server)])
            .assert()
            .success()
            .stdout("Deleted Product(3)\n");

        mock.assert();
    }

    #[test]
    fn invalid_payload_exits_2() {
        cmd()
            .args([
                "create",
                "Product",
                "--data",
                "{not json",
                "--endpoint",
                "http://127.0.0.1:9/odata",
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON payload"));
    }

    #[test]
    fn unreachable_service_exits_3() {
        cmd()
            .args(["delete", "Product", "3", "--endpoint", "http://127.0.0.1:9/odata"])
            .args(["--timeout", "2"])
            .assert()
            .code(3);
    }
}
