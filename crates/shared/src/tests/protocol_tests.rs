use super::*;
use serde_json::json;

#[test]
fn decodes_connection_options_with_serial_schema() {
    let raw = json!({
        "current": {
            "state": "Operational",
            "connector": "serial",
            "parameters": {"port": "/dev/ttyUSB0", "baudrate": 115200},
            "printerProfile": "_default"
        },
        "options": {
            "connectors": [
                {
                    "connector": "serial",
                    "name": "Serial Connection",
                    "parameters": {
                        "port": ["/dev/ttyUSB0", "/dev/ttyACM0"],
                        "baudrate": [115200, 250000]
                    }
                }
            ],
            "preferredConnector": {"connector": "serial", "parameters": {"port": "/dev/ttyACM0"}},
            "printerProfiles": [{"id": "_default", "name": "Default"}, "prusa"],
            "preferredProfile": "prusa"
        }
    });

    let response: ConnectionOptionsResponse = serde_json::from_value(raw).expect("decode");
    assert_eq!(response.current.connector, Some(ConnectorId::serial()));
    assert_eq!(
        response.current.printer_profile,
        Some(ProfileId::from("_default"))
    );

    let serial = &response.options.connectors[0];
    assert_eq!(
        string_options(&serial.parameters, "port"),
        vec!["/dev/ttyUSB0".to_string(), "/dev/ttyACM0".to_string()]
    );
    assert_eq!(u32_options(&serial.parameters, "baudrate"), vec![115200, 250000]);

    let profiles: Vec<&str> = response
        .options
        .printer_profiles
        .iter()
        .map(|p| p.id().as_str())
        .collect();
    assert_eq!(profiles, vec!["_default", "prusa"]);
    assert_eq!(response.options.printer_profiles[0].name(), "Default");
    assert_eq!(response.options.printer_profiles[1].name(), "prusa");
}

#[test]
fn tolerates_null_sections_from_a_closed_connection() {
    let raw = json!({
        "current": {"state": "Closed", "connector": null, "parameters": null, "printerProfile": null},
        "options": {"connectors": [], "preferredConnector": null}
    });

    let response: ConnectionOptionsResponse = serde_json::from_value(raw).expect("decode");
    assert!(response.current.connector.is_none());
    assert!(response.current.parameters.is_empty());
    assert!(response.options.preferred_connector.connector.is_none());
}

#[test]
fn parameter_values_accept_numbers_and_numeric_text() {
    assert_eq!(parameter_as_u32(&json!(250000)), Some(250000));
    assert_eq!(parameter_as_u32(&json!("115200")), Some(115200));
    assert_eq!(parameter_as_u32(&json!("AUTO")), None);
    assert_eq!(parameter_as_string(&json!(9600)), Some("9600".to_string()));
    assert_eq!(parameter_as_string(&json!("")), None);
}

#[test]
fn connect_command_serializes_with_command_tag() {
    let mut parameters = BTreeMap::new();
    parameters.insert("port".to_string(), "/dev/ttyUSB0".to_string());
    let command = ConnectionCommand::Connect(ConnectRequest {
        connector: ConnectorId::serial(),
        parameters,
        printer_profile: Some(ProfileId::from("_default")),
        autoconnect: false,
        save: None,
    });

    let value = serde_json::to_value(&command).expect("encode");
    assert_eq!(
        value,
        json!({
            "command": "connect",
            "connector": "serial",
            "parameters": {"port": "/dev/ttyUSB0"},
            "printerProfile": "_default",
            "autoconnect": false
        })
    );

    let value = serde_json::to_value(ConnectionCommand::Disconnect).expect("encode");
    assert_eq!(value, json!({"command": "disconnect"}));
}

#[test]
fn state_flags_default_to_closed_and_ignore_unknown_flags() {
    assert!(StateFlags::default().closed_or_error);

    let flags: StateFlags = serde_json::from_value(json!({
        "operational": true,
        "printing": true,
        "closedOrError": false,
        "sdReady": true,
        "somethingNew": true
    }))
    .expect("decode");
    assert!(flags.operational);
    assert!(flags.printing);
    assert!(!flags.closed_or_error);
    assert!(flags.sd_ready);
    assert!(!flags.paused);
}

#[test]
fn system_command_confirm_accepts_false_and_text() {
    let commands: SystemCommandsResponse = serde_json::from_value(json!({
        "core": [
            {"action": "shutdown", "name": "Shutdown system", "confirm": "Really?", "async": true},
            {"action": "reboot", "name": "Reboot", "confirm": false, "ignore": true}
        ],
        "custom": []
    }))
    .expect("decode");

    assert_eq!(commands.core[0].confirm.as_deref(), Some("Really?"));
    assert!(commands.core[0].is_async);
    assert!(commands.core[1].confirm.is_none());
    assert!(commands.core[1].ignore);
    assert!(commands.group(ActionSource::Plugin).is_empty());
}

#[test]
fn whitespace_confirm_text_still_prompts() {
    let commands: SystemCommandsResponse = serde_json::from_value(json!({
        "core": [
            {"action": "restart", "name": "Restart", "confirm": "  "},
            {"action": "noop", "name": "Noop", "confirm": ""}
        ]
    }))
    .expect("decode");

    assert_eq!(commands.core[0].confirm.as_deref(), Some("  "));
    assert!(commands.core[1].confirm.is_none());
}

#[test]
fn startup_notices_accept_host_field_names() {
    let response: StartupResponse = serde_json::from_value(json!({
        "startup": {
            "flagged_basefolders": {"uploads": "not writable"},
            "python_eol": {"version": "3.7", "date": "2023-06-27", "soon": false, "last_octoprint": "1.11.*"}
        }
    }))
    .expect("decode");

    let eol = response.startup.python_eol.expect("eol notice");
    assert_eq!(eol.token(), "3.7;2023-06-27");
    assert_eq!(eol.last_supporting_release.as_deref(), Some("1.11.*"));
    assert_eq!(
        response.startup.flagged_basefolders.get("uploads").map(String::as_str),
        Some("not writable")
    );
}

#[test]
fn api_exception_prefers_json_error_message() {
    let exc = crate::error::ApiException::from_response(409, r#"{"error": "Printer is busy"}"#);
    assert_eq!(exc.code, crate::error::ErrorCode::Conflict);
    assert_eq!(exc.message, "Printer is busy");

    let exc = crate::error::ApiException::from_response(500, "  boom \n");
    assert_eq!(exc.code, crate::error::ErrorCode::Internal);
    assert_eq!(exc.message, "boom");
}

#[test]
fn action_source_parses_case_insensitively() {
    use crate::domain::ActionSource;

    assert_eq!("Plugin".parse::<ActionSource>(), Ok(ActionSource::Plugin));
    assert_eq!(" core ".parse::<ActionSource>(), Ok(ActionSource::Core));
    let err = "vendor".parse::<ActionSource>().expect_err("unknown source");
    assert_eq!(err.0, "vendor");
}

#[test]
fn printer_status_defaults_to_closed_without_flags() {
    let status: PrinterStatusResponse =
        serde_json::from_value(json!({"state": {"text": "Offline"}})).expect("status");
    assert_eq!(status.state.text, "Offline");
    assert!(status.state.flags.closed_or_error);
    assert!(status.state.error.is_none());
}
