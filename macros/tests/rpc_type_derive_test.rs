//! Tests for #[derive(RpcBean)] and #[derive(RpcEnum)]

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use bindlet_macros::{RpcBean, RpcEnum};
use bindlet_rpc::{RpcType, TypeConverter, ValueType};
use serde::Deserialize;
use serde_json::json;

#[derive(RpcEnum, Deserialize, Debug, PartialEq)]
enum Priority {
    Low,
    Normal,
    #[rpc(rename = "URGENT")]
    #[serde(rename = "URGENT")]
    High,
}

#[derive(RpcBean, Deserialize, Debug)]
struct Assignee {
    login: String,
    team: Option<String>,
}

#[derive(RpcBean, Deserialize, Debug)]
#[rpc(name = "Ticket")]
struct TicketForm {
    title: String,
    priority: Priority,
    estimate: i32,
    #[rpc(rename = "assignedTo")]
    #[serde(rename = "assignedTo")]
    assignee: Option<Assignee>,
    #[rpc(read_only)]
    id: Option<i64>,
    #[rpc(skip)]
    #[serde(skip)]
    cache: Vec<u8>,
}

#[derive(RpcBean)]
struct Page<T> {
    items: Option<T>,
    total: i64,
}

fn bean(ty: ValueType) -> bindlet_rpc::BeanType {
    match ty {
        ValueType::Bean(bean) => bean,
        other => panic!("expected bean, got {other:?}"),
    }
}

#[test]
fn test_enum_constants() {
    let ValueType::Enum(priority) = Priority::value_type() else {
        panic!("expected enum");
    };
    assert_eq!(priority.name(), "Priority");
    assert_eq!(priority.constants(), ["Low", "Normal", "URGENT"]);
}

#[test]
fn test_bean_properties() {
    let ticket = bean(TicketForm::value_type());
    assert_eq!(ticket.name(), "Ticket");

    let names: Vec<_> = ticket.properties().iter().map(|p| p.name()).collect();
    assert_eq!(names, ["title", "priority", "estimate", "assignedTo", "id"]);

    let id = &ticket.properties()[4];
    assert!(!id.is_writable());
    assert_eq!(id.ty(), &<Option<i64>>::value_type());

    let assigned = &ticket.properties()[3];
    assert_eq!(assigned.ty().name(), "Assignee");
}

#[test]
fn test_generic_bean() {
    let page = bean(<Page<String>>::value_type());
    assert_eq!(page.name(), "Page");
    assert_eq!(page.properties()[0].ty(), &ValueType::String);
}

#[test]
fn test_derived_description_drives_conversion() {
    let converted = TypeConverter::new()
        .convert(
            &TicketForm::value_type(),
            &json!({
                "title": "Broken login",
                "priority": "URGENT",
                "estimate": "3",
                "assignedTo": { "login": "kim" },
                "id": 77
            }),
        )
        .unwrap();

    let form: TicketForm = serde_json::from_value(converted).unwrap();
    assert_eq!(form.title, "Broken login");
    assert_eq!(form.priority, Priority::High);
    assert_eq!(form.estimate, 3);
    assert_eq!(form.assignee.map(|a| a.login), Some("kim".to_string()));
    assert_eq!(form.id, None);
}

#[test]
fn test_scalars_coerce_into_text_properties() {
    let converted = TypeConverter::new()
        .convert(&Assignee::value_type(), &json!({ "login": 5, "team": "core" }))
        .unwrap();
    assert_eq!(converted, json!({ "login": "5", "team": "core" }));
}
