//! End-to-end scenarios exercising the public API through `#[derive(Reflect)]`
//! rather than hand-written `Reflect` impls, one test per scenario.

use std::collections::HashMap;

mod common;

use structsync::{
    apply, apply_resolved, diff, guarded, AcceptIncoming, Crdt, CrdtConfig, CustomData, CustomValue, DiffOptions,
    FieldFlags, FieldSchema, NodeKind, Reflect, ResolverKind, StructValue, Text, TypeSchema, Value,
};

#[derive(Clone, Debug, PartialEq, Reflect)]
struct Profile {
    name: String,
    age: i64,
}

#[test]
fn struct_update() {
    common::init();
    let before = Profile {
        name: "Ada".to_string(),
        age: 30,
    };
    let after = Profile {
        name: "Ada".to_string(),
        age: 31,
    };
    let patch = diff(&before.to_value(), &after.to_value(), &DiffOptions::default()).expect("values differ");

    let mut root = before.to_value();
    apply(&patch, &mut root).unwrap();
    assert_eq!(Profile::from_value(root).unwrap(), after);
}

#[derive(Clone, Debug, PartialEq, Reflect)]
struct Item {
    #[reflect(key)]
    id: i64,
    value: String,
}

#[derive(Clone, Debug, PartialEq, Reflect)]
struct Board {
    items: Vec<Item>,
}

#[test]
fn keyed_slice_reorder() {
    common::init();
    let before = Board {
        items: vec![
            Item {
                id: 1,
                value: "first".to_string(),
            },
            Item {
                id: 2,
                value: "second".to_string(),
            },
        ],
    };
    let after = Board {
        items: vec![before.items[1].clone(), before.items[0].clone()],
    };

    let patch = diff(&before.to_value(), &after.to_value(), &DiffOptions::default()).expect("order differs");
    let NodeKind::Struct { fields, .. } = &patch.kind else {
        panic!("expected a struct patch");
    };
    let (_, items_patch) = fields.iter().find(|(idx, _)| *idx == Board::schema().unwrap().field_index("items").unwrap()).unwrap();
    match &items_patch.kind {
        NodeKind::Slice(ops) => assert!(
            ops.iter().any(|op| matches!(op, structsync::SliceOp::Move(_))),
            "reorder should be expressed as a Move, not a delete+insert pair"
        ),
        other => panic!("unexpected {:?}", other),
    }

    let mut root = before.to_value();
    apply(&patch, &mut root).unwrap();
    assert_eq!(Board::from_value(root).unwrap(), after);
}

#[derive(Clone, Debug, PartialEq, Reflect)]
struct Store {
    counts: HashMap<String, i64>,
}

#[test]
fn map_canonical_key() {
    common::init();
    let mut before_counts = HashMap::new();
    before_counts.insert("apples".to_string(), 3);
    before_counts.insert("pears".to_string(), 1);
    let before = Store { counts: before_counts };

    let mut after_counts = before.counts.clone();
    after_counts.remove("pears");
    after_counts.insert("apples".to_string(), 4);
    after_counts.insert("plums".to_string(), 2);
    let after = Store { counts: after_counts };

    let patch = diff(&before.to_value(), &after.to_value(), &DiffOptions::default()).expect("counts differ");
    let mut root = before.to_value();
    apply(&patch, &mut root).unwrap();
    assert_eq!(Store::from_value(root).unwrap(), after);
}

#[derive(Clone, Debug, PartialEq, Reflect)]
struct Account {
    balance: i64,
}

#[test]
fn conditional_patch() {
    common::init();
    let raise = |amount: i64| {
        let patch = structsync::Patch::new(NodeKind::Value {
            old: None,
            new: Some(Value::I64(amount)),
        });
        guarded(patch, Some("/balance >= 0"), None).unwrap()
    };

    // Gate fails: the document's current balance is negative, so the edit
    // is skipped even though the structural shape would accept it.
    let overdrawn = Account { balance: -5 };
    let mut root = overdrawn.to_value();
    let patch = structsync::Patch::new(NodeKind::Struct {
        type_name: Account::type_name(),
        fields: vec![(
            Account::schema().unwrap().field_index("balance").unwrap(),
            raise(100),
        )],
    });
    apply_resolved(&patch, &mut root, &mut AcceptIncoming).unwrap();
    assert_eq!(Account::from_value(root).unwrap(), overdrawn, "gate should have blocked the edit");

    // Gate passes: a non-negative balance lets the same patch shape through.
    let healthy = Account { balance: 10 };
    let mut root = healthy.to_value();
    let patch = structsync::Patch::new(NodeKind::Struct {
        type_name: Account::type_name(),
        fields: vec![(
            Account::schema().unwrap().field_index("balance").unwrap(),
            raise(100),
        )],
    });
    apply_resolved(&patch, &mut root, &mut AcceptIncoming).unwrap();
    assert_eq!(Account::from_value(root).unwrap(), Account { balance: 100 });
}

#[derive(Clone, Debug, PartialEq, Reflect)]
struct Counter {
    count: i64,
}

#[test]
fn lww_crdt() {
    common::init();
    let a = Crdt::new(
        Counter { count: 0 },
        CrdtConfig {
            node_id: "replica-a".to_string(),
            resolver: ResolverKind::Lww,
        },
    );
    let b = Crdt::new(
        Counter { count: 0 },
        CrdtConfig {
            node_id: "replica-b".to_string(),
            resolver: ResolverKind::Lww,
        },
    );

    let delta_a = a.edit(|c| c.count = 7).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let delta_b = b.edit(|c| c.count = 9).unwrap();

    a.apply_delta(&delta_b).unwrap();
    b.apply_delta(&delta_a).unwrap();

    let final_a = a.view().unwrap();
    let final_b = b.view().unwrap();
    assert_eq!(final_a, final_b);
    assert_eq!(final_a.count, 9, "the later HLC timestamp should win");
}

/// `Document` embeds a `Text` CRDT leaf; `Reflect` is hand-written here
/// because a `custom{kind:"text"}` field has no derivable wire shape of its
/// own (see DESIGN.md).
#[derive(Clone, Debug)]
struct Document {
    title: String,
    body: Text,
}

static DOCUMENT_FIELDS: &[FieldSchema] = &[
    FieldSchema {
        name: "title",
        wire_name: "title",
        flags: FieldFlags::default(),
    },
    FieldSchema {
        name: "body",
        wire_name: "body",
        flags: FieldFlags::default(),
    },
];
static DOCUMENT_SCHEMA: TypeSchema = TypeSchema {
    type_name: "scenarios::Document",
    fields: DOCUMENT_FIELDS,
};

impl Reflect for Document {
    fn type_name() -> &'static str {
        "scenarios::Document"
    }
    fn schema() -> Option<&'static TypeSchema> {
        Some(structsync::register_schema(&DOCUMENT_SCHEMA))
    }
    fn to_value(&self) -> Value {
        Document::schema();
        Value::Struct(StructValue {
            type_name: "scenarios::Document",
            fields: vec![
                (0, Value::Str(self.title.clone())),
                (1, Value::Custom(CustomValue(Box::new(self.body.clone())))),
            ],
        })
    }
    fn from_value(value: Value) -> Result<Self, structsync::SchemaError> {
        let s = value.into_struct("scenarios::Document")?;
        let title = match s.field(0) {
            Some(Value::Str(t)) => t.clone(),
            _ => String::new(),
        };
        let body = match s.field(1) {
            Some(Value::Custom(c)) => c.0.as_any().downcast_ref::<Text>().cloned().unwrap_or_default(),
            _ => Text::new(),
        };
        Ok(Document { title, body })
    }
}

#[test]
fn text_rga() {
    common::init();
    structsync::register_text_hooks();

    let base = Document {
        title: "notes".to_string(),
        body: Text::from_str("base", "hello"),
    };

    let a = Crdt::new(
        base.clone(),
        CrdtConfig {
            node_id: "writer-a".to_string(),
            resolver: ResolverKind::StateMerge,
        },
    );
    let b = Crdt::new(
        base,
        CrdtConfig {
            node_id: "writer-b".to_string(),
            resolver: ResolverKind::StateMerge,
        },
    );

    let delta_a = a
        .edit(|d| d.body.insert_at(5, structsync::RunId { node_id: "writer-a".to_string(), counter: 0 }, " world"))
        .unwrap();
    let delta_b = b
        .edit(|d| d.body.insert_at(0, structsync::RunId { node_id: "writer-b".to_string(), counter: 0 }, "say: "))
        .unwrap();

    a.apply_delta(&delta_b).unwrap();
    b.apply_delta(&delta_a).unwrap();

    let final_a = a.view().unwrap();
    let final_b = b.view().unwrap();
    assert_eq!(final_a.body.get_ordered(), final_b.body.get_ordered());
    assert_eq!(final_a.body.get_ordered(), "say: hello world");
}
