use chrono::NaiveDate;
use indexmap::indexmap;
use serde_json::json;

use crate::{
    plan::{UploadPlan, scoping},
    schema::{
        Collection, Datatype, FieldInfo, Picklist, PicklistKind, Relationship, SchemaMetadata,
        TreeDefinition, TreeRank,
    },
    store::{Store, memory::MemoryStore},
    uiformat::{FormatterField, UiFormatter},
    upload::{Mode, Outcome, UploadResult, Uploader},
    value::{Fields, Row, Value},
};

fn rank(rank_id: i32, name: &str, enforced: bool, is_in_fullname: bool) -> TreeRank {
    TreeRank { rank_id, name: name.into(), enforced, is_in_fullname }
}

fn metadata() -> SchemaMetadata {
    let mut metadata = SchemaMetadata::new();

    metadata.add_formatter(UiFormatter::new(
        "CatalogNumberNumeric",
        vec![FormatterField::Numeric { size: 9 }],
    ));
    metadata.add_picklist(Picklist {
        id: 5,
        name: "CollectingMethod".into(),
        readonly: false,
        kind: PicklistKind::Items,
        items: indexmap! { "Trawl".into() => "trawl".into() },
    });

    metadata
        .add_table("collectionobject")
        .field(
            "catalognumber",
            FieldInfo {
                required: true,
                uiformatter: Some("CatalogNumberNumeric".into()),
                ..Default::default()
            },
        )
        .plain_fields(&["collectingevent"])
        .field("collectionmemberid", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .relationship(
            "collectingevent",
            Relationship {
                table: "Collectingevent".into(),
                fk_field: "collectingevent".into(),
                order_field: None,
            },
        )
        .relationship(
            "determinations",
            Relationship {
                table: "Determination".into(),
                fk_field: "collectionobject".into(),
                order_field: None,
            },
        );

    metadata
        .add_table("collectingevent")
        .field("startdate", FieldInfo { datatype: Datatype::Date, ..Default::default() })
        .field("startdateprecision", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .field("enddate", FieldInfo { datatype: Datatype::Date, ..Default::default() })
        .field("enddateprecision", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .field(
            "method",
            FieldInfo { picklist: Some("CollectingMethod".into()), ..Default::default() },
        )
        .plain_fields(&["stationfieldnumber", "locality"])
        .relationship(
            "locality",
            Relationship { table: "Locality".into(), fk_field: "locality".into(), order_field: None },
        )
        .relationship(
            "collectors",
            Relationship {
                table: "Collector".into(),
                fk_field: "collectingevent".into(),
                order_field: Some("ordernumber".into()),
            },
        );

    metadata
        .add_table("locality")
        .field("latitude1", FieldInfo { datatype: Datatype::Double, ..Default::default() })
        .field("longitude1", FieldInfo { datatype: Datatype::Double, ..Default::default() })
        .field("srclatlongunit", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .field("originallatlongunit", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .plain_fields(&["localityname", "lat1text", "long1text", "geography"])
        .relationship(
            "geography",
            Relationship { table: "Geography".into(), fk_field: "geography".into(), order_field: None },
        );

    metadata
        .add_table("agent")
        .field("agenttype", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .plain_fields(&["title", "firstname", "middleinitial", "lastname"]);

    metadata
        .add_table("collector")
        .field("isprimary", FieldInfo { datatype: Datatype::Boolean, ..Default::default() })
        .field("ordernumber", FieldInfo { datatype: Datatype::Integer, ..Default::default() })
        .plain_fields(&["agent", "collectingevent"])
        .relationship(
            "agent",
            Relationship { table: "Agent".into(), fk_field: "agent".into(), order_field: None },
        );

    metadata
        .add_table("determination")
        .field("iscurrent", FieldInfo { datatype: Datatype::Boolean, ..Default::default() })
        .field("determineddate", FieldInfo { datatype: Datatype::Date, ..Default::default() })
        .field(
            "determineddateprecision",
            FieldInfo { datatype: Datatype::Integer, ..Default::default() },
        )
        .plain_fields(&["taxon", "determiner", "collectionobject"])
        .relationship(
            "determiner",
            Relationship { table: "Agent".into(), fk_field: "determiner".into(), order_field: None },
        )
        .relationship(
            "taxon",
            Relationship { table: "Taxon".into(), fk_field: "taxon".into(), order_field: None },
        );

    metadata.add_table("taxon").plain_fields(&["name", "author", "fullname"]);
    metadata.add_table("geography").plain_fields(&["name", "fullname"]);

    metadata.add_tree_definition(
        1,
        "taxon",
        TreeDefinition {
            id: 1,
            name: "Taxon".into(),
            ranks: vec![
                rank(10, "Kingdom", true, false),
                rank(30, "Phylum", false, false),
                rank(60, "Class", false, false),
                rank(130, "Superfamily", false, false),
                rank(140, "Family", false, false),
                rank(180, "Genus", false, true),
                rank(190, "Subgenus", false, true),
                rank(220, "Species", false, true),
                rank(230, "Subspecies", false, true),
            ],
        },
    );
    metadata.add_tree_definition(
        1,
        "geography",
        TreeDefinition {
            id: 2,
            name: "Geography".into(),
            ranks: vec![
                rank(100, "Continent", false, false),
                rank(200, "Country", false, true),
                rank(300, "State", false, true),
                rank(400, "County", false, true),
            ],
        },
    );

    metadata
}

fn collection() -> Collection {
    Collection {
        id: 1,
        discipline_id: 1,
        defaults: indexmap! {
            "collectionobject".into() => indexmap! {
                "collectionmemberid".into() => Value::Integer(1),
            },
        },
    }
}

fn catalog_plan() -> serde_json::Value {
    json!({
        "baseTableName": "Collectionobject",
        "uploadable": { "uploadTable": {
            "wbcols": { "catalognumber": "BMSM No." },
            "static": {},
            "toOne": {
                "collectingevent": { "uploadTable": {
                    "wbcols": {
                        "enddate": "End Date Collected",
                        "startdate": "Start Date Collected",
                        "stationfieldnumber": "Station No.",
                        "method": "Method"
                    },
                    "static": {},
                    "toOne": {
                        "locality": { "uploadTable": {
                            "wbcols": {
                                "localityname": "Site",
                                "latitude1": "Latitude1",
                                "longitude1": "Longitude1"
                            },
                            "static": { "srclatlongunit": 0 },
                            "toOne": {
                                "geography": { "treeRecord": {
                                    "ranks": {
                                        "Continent": "Continent/Ocean",
                                        "Country": "Country",
                                        "State": "State/Prov/Pref",
                                        "County": "Region"
                                    }
                                }}
                            },
                            "toMany": {}
                        }}
                    },
                    "toMany": {
                        "collectors": [
                            {
                                "wbcols": {},
                                "static": { "isprimary": true },
                                "toOne": { "agent": { "uploadTable": {
                                    "wbcols": {
                                        "title": "Collector 1 Title",
                                        "firstname": "Collector 1 First Name",
                                        "middleinitial": "Collector 1 Middle Initial",
                                        "lastname": "Collector 1 Last Name"
                                    },
                                    "static": { "agenttype": 1 },
                                    "toOne": {},
                                    "toMany": {}
                                }}}
                            },
                            {
                                "wbcols": {},
                                "static": { "isprimary": false },
                                "toOne": { "agent": { "uploadTable": {
                                    "wbcols": {
                                        "title": "Collector 2 Title",
                                        "firstname": "Collector 2 First Name",
                                        "middleinitial": "Collector 2 Middle Initial",
                                        "lastname": "Collector 2 Last name"
                                    },
                                    "static": { "agenttype": 1 },
                                    "toOne": {},
                                    "toMany": {}
                                }}}
                            }
                        ]
                    }
                }}
            },
            "toMany": {
                "determinations": [
                    {
                        "wbcols": { "determineddate": "ID Date" },
                        "static": { "iscurrent": true },
                        "toOne": {
                            "determiner": { "uploadTable": {
                                "wbcols": {
                                    "title": "Determiner 1 Title",
                                    "firstname": "Determiner 1 First Name",
                                    "middleinitial": "Determiner 1 Middle Initial",
                                    "lastname": "Determiner 1 Last Name"
                                },
                                "static": { "agenttype": 1 },
                                "toOne": {},
                                "toMany": {}
                            }},
                            "taxon": { "treeRecord": {
                                "ranks": {
                                    "Class": "Class",
                                    "Superfamily": "Superfamily",
                                    "Family": "Family",
                                    "Genus": "Genus",
                                    "Subgenus": "Subgenus",
                                    "Species": { "treeNodeCols": {
                                        "name": "Species",
                                        "author": "Species Author"
                                    }},
                                    "Subspecies": { "treeNodeCols": {
                                        "name": "Subspecies",
                                        "author": "Subspecies Author"
                                    }}
                                }
                            }}
                        }
                    }
                ]
            }
        }}
    })
}

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs.iter().map(|(caption, cell)| (caption.to_string(), cell.to_string())).collect()
}

fn catalog_row() -> Row {
    row(&[
        ("BMSM No.", "100000"),
        ("End Date Collected", ""),
        ("Start Date Collected", "7/1999"),
        ("Station No.", "42"),
        ("Method", "Dredge"),
        ("Site", "Hannah Bay"),
        ("Latitude1", "27 45.3 N"),
        ("Longitude1", "82 13.2 W"),
        ("Continent/Ocean", "North America"),
        ("Country", "USA"),
        ("State/Prov/Pref", "Florida"),
        ("Region", "Manatee Co."),
        ("Collector 1 Title", ""),
        ("Collector 1 First Name", "Ben"),
        ("Collector 1 Middle Initial", ""),
        ("Collector 1 Last Name", "Smith"),
        ("Collector 2 Title", ""),
        ("Collector 2 First Name", ""),
        ("Collector 2 Middle Initial", ""),
        ("Collector 2 Last name", "Jones"),
        ("ID Date", "1/2/2001"),
        ("Determiner 1 Title", ""),
        ("Determiner 1 First Name", ""),
        ("Determiner 1 Middle Initial", ""),
        ("Determiner 1 Last Name", "Cox"),
        ("Class", "Gastropoda"),
        ("Superfamily", ""),
        ("Family", "Helicidae"),
        ("Genus", "Cepaea"),
        ("Subgenus", ""),
        ("Species", "nemoralis"),
        ("Species Author", "L."),
        ("Subspecies", ""),
        ("Subspecies Author", ""),
    ])
}

async fn upload(
    store: &MemoryStore,
    metadata: &SchemaMetadata,
    plan_json: &serde_json::Value,
    row: &Row,
    mode: Mode,
) -> UploadResult {
    let plan = UploadPlan::parse(metadata, plan_json).unwrap();
    let scoped = scoping::apply_scoping(&plan, metadata, &collection()).unwrap();
    let bound = scoped.bind(row).unwrap();
    Uploader::new(store, metadata).upload_row(bound, mode).await.unwrap()
}

fn field<'a>(fields: &'a Fields, name: &str) -> &'a Value {
    fields.get(name).unwrap_or_else(|| panic!("missing field {name}"))
}

fn only_record(store: &MemoryStore, table: &str) -> Fields {
    let records = store.records(table);
    assert_eq!(records.len(), 1, "expected exactly one {table} record");
    records.into_iter().next().unwrap().1
}

fn date(year: i32, month: u32, day: u32) -> Value {
    Value::Date(NaiveDate::from_ymd_opt(year, month, day).unwrap())
}

fn tree_node(definition: i64, rank_id: i64, name: &str, parent: Option<i64>) -> Fields {
    indexmap! {
        "name".to_owned() => Value::String(name.into()),
        "rankid".to_owned() => Value::Integer(rank_id),
        "definition".to_owned() => Value::Integer(definition),
        "parent".to_owned() => parent.map(Value::Integer).unwrap_or(Value::Null),
    }
}

#[tokio::test]
async fn test_fresh_catalog_row_materializes_the_whole_graph() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let result = upload(&store, &metadata, &catalog_plan(), &catalog_row(), Mode::Create).await;

    let Outcome::Uploaded { id, ref picklist_additions, .. } = result.outcome else {
        panic!("expected an upload, got {:?}", result.outcome);
    };
    assert!(picklist_additions.is_empty());

    let object = only_record(&store, "collectionobject");
    assert_eq!(field(&object, "catalognumber"), &Value::String("000100000".into()));
    assert_eq!(field(&object, "collectionmemberid"), &Value::Integer(1));
    assert_eq!(store.record("collectionobject", id).unwrap(), object);

    let event = only_record(&store, "collectingevent");
    assert_eq!(field(&event, "startdate"), &date(1999, 7, 1));
    assert_eq!(field(&event, "startdateprecision"), &Value::Integer(1));
    assert_eq!(field(&event, "stationfieldnumber"), &Value::String("42".into()));
    assert_eq!(field(&event, "method"), &Value::String("Dredge".into()));

    // the open picklist gained the new value
    assert_eq!(store.picklist_items(), vec![(5, "Dredge".to_owned())]);
    let event_result = &result.to_one["collectingevent"];
    let Outcome::Uploaded { ref picklist_additions, .. } = event_result.outcome else {
        panic!("expected the collecting event to be uploaded");
    };
    assert_eq!(picklist_additions.len(), 1);
    assert_eq!(picklist_additions[0].value, "Dredge");

    let locality = only_record(&store, "locality");
    assert_eq!(field(&locality, "localityname"), &Value::String("Hannah Bay".into()));
    assert_eq!(field(&locality, "latitude1"), &Value::Double(27.0 + 45.3 / 60.0));
    assert_eq!(field(&locality, "longitude1"), &Value::Double(-(82.0 + 13.2 / 60.0)));
    assert_eq!(field(&locality, "lat1text"), &Value::String("27 45.3 N".into()));
    assert_eq!(field(&locality, "originallatlongunit"), &Value::Integer(2));
    assert_eq!(field(&locality, "srclatlongunit"), &Value::Integer(0));

    // two collectors in plan order, densely order-numbered
    let collectors = store.records("collector");
    assert_eq!(collectors.len(), 2);
    assert_eq!(field(&collectors[0].1, "ordernumber"), &Value::Integer(0));
    assert_eq!(field(&collectors[0].1, "isprimary"), &Value::Boolean(true));
    assert_eq!(field(&collectors[1].1, "ordernumber"), &Value::Integer(1));
    assert_eq!(field(&collectors[1].1, "isprimary"), &Value::Boolean(false));

    let agents = store.records("agent");
    assert_eq!(agents.len(), 3);
    let last_names: Vec<_> = agents
        .iter()
        .map(|(_, agent)| field(agent, "lastname").clone())
        .collect();
    assert_eq!(
        last_names,
        vec![
            Value::String("Smith".into()),
            Value::String("Jones".into()),
            Value::String("Cox".into()),
        ]
    );

    let determination = only_record(&store, "determination");
    assert_eq!(field(&determination, "iscurrent"), &Value::Boolean(true));
    assert_eq!(field(&determination, "determineddate"), &date(2001, 2, 1));
    assert_eq!(field(&determination, "determineddateprecision"), &Value::Integer(0));
    assert_eq!(field(&determination, "collectionobject"), &Value::Integer(id));

    // taxon chain: sentinel kingdom, class, family, genus, species
    let taxa = store.records("taxon");
    assert_eq!(taxa.len(), 5);
    let names: Vec<_> = taxa.iter().map(|(_, t)| field(t, "name").clone()).collect();
    assert_eq!(
        names,
        vec![
            Value::String("Uploaded".into()),
            Value::String("Gastropoda".into()),
            Value::String("Helicidae".into()),
            Value::String("Cepaea".into()),
            Value::String("nemoralis".into()),
        ]
    );
    let species = &taxa[4].1;
    assert_eq!(field(species, "author"), &Value::String("L.".into()));
    assert_eq!(field(species, "rankid"), &Value::Integer(220));
    assert_eq!(field(species, "parent"), &Value::Integer(taxa[3].0));

    assert_eq!(store.count("geography"), 4);
}

#[tokio::test]
async fn test_second_identical_row_matches_everything() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let first = upload(&store, &metadata, &catalog_plan(), &catalog_row(), Mode::Create).await;
    let first_id = first.record_id().unwrap();

    let counts: Vec<_> = ["collectionobject", "collectingevent", "locality", "agent", "taxon", "geography"]
        .iter()
        .map(|table| store.count(table))
        .collect();

    let second = upload(&store, &metadata, &catalog_plan(), &catalog_row(), Mode::Create).await;
    let Outcome::Matched { id, .. } = second.outcome else {
        panic!("expected the second run to match, got {:?}", second.outcome);
    };
    assert_eq!(id, first_id);

    let counts_after: Vec<_> = ["collectionobject", "collectingevent", "locality", "agent", "taxon", "geography"]
        .iter()
        .map(|table| store.count(table))
        .collect();
    assert_eq!(counts, counts_after);
}

#[tokio::test]
async fn test_blank_required_field_fails_the_cell() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let mut bad_row = catalog_row();
    bad_row.insert("BMSM No.".into(), "".into());

    let result = upload(&store, &metadata, &catalog_plan(), &bad_row, Mode::Create).await;
    let Outcome::ParseFailed { ref issues, .. } = result.outcome else {
        panic!("expected a parse failure, got {:?}", result.outcome);
    };
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].column, "BMSM No.");
    assert_eq!(issues[0].message, "field is required");
    assert_eq!(store.count("collectionobject"), 0);
}

#[tokio::test]
async fn test_deepest_tree_match_extends_an_existing_chain() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let animalia = store.seed("taxon", tree_node(1, 10, "Animalia", None));
    let mollusca = store.seed("taxon", tree_node(1, 30, "Mollusca", Some(animalia)));
    let gastropoda = store.seed("taxon", tree_node(1, 60, "Gastropoda", Some(mollusca)));
    let helicidae = store.seed("taxon", tree_node(1, 140, "Helicidae", Some(gastropoda)));

    let plan = json!({
        "baseTableName": "Taxon",
        "uploadable": { "treeRecord": {
            "ranks": { "Class": "Class", "Family": "Family", "Species": "Species" }
        }}
    });
    let data = row(&[
        ("Class", "Gastropoda"),
        ("Family", "Helicidae"),
        ("Species", "Cepaea nemoralis"),
    ]);

    let result = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    let Outcome::Uploaded { id, .. } = result.outcome else {
        panic!("expected a species upload, got {:?}", result.outcome);
    };
    assert_eq!(store.count("taxon"), 5);
    let species = store.record("taxon", id).unwrap();
    assert_eq!(field(&species, "name"), &Value::String("Cepaea nemoralis".into()));
    assert_eq!(field(&species, "parent"), &Value::Integer(helicidae));
}

#[tokio::test]
async fn test_tree_upload_is_idempotent() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let plan = json!({
        "baseTableName": "Taxon",
        "uploadable": { "treeRecord": {
            "ranks": { "Class": "Class", "Family": "Family", "Species": "Species" }
        }}
    });
    let data = row(&[
        ("Class", "Gastropoda"),
        ("Family", "Helicidae"),
        ("Species", "Cepaea nemoralis"),
    ]);

    let first = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    let Outcome::Uploaded { id: uploaded, .. } = first.outcome else {
        panic!("expected an upload");
    };
    let count = store.count("taxon");

    let second = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    let Outcome::Matched { id: matched, .. } = second.outcome else {
        panic!("expected a match, got {:?}", second.outcome);
    };
    assert_eq!(matched, uploaded);
    assert_eq!(store.count("taxon"), count);
}

#[tokio::test]
async fn test_blank_tree_ranks_yield_a_null_record() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let plan = json!({
        "baseTableName": "Taxon",
        "uploadable": { "treeRecord": {
            "ranks": { "Class": "Class", "Family": "Family" }
        }}
    });
    let data = row(&[("Class", " "), ("Family", "")]);
    let result = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    assert!(result.is_null_record());
    assert_eq!(store.count("taxon"), 0);
}

#[tokio::test]
async fn test_match_only_performs_no_writes() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let plan = json!({
        "baseTableName": "Agent",
        "uploadable": { "mustMatchTable": {
            "wbcols": { "lastname": "Last Name" },
            "static": {},
            "toOne": {},
            "toMany": {}
        }}
    });
    let data = row(&[("Last Name", "Smith")]);
    let result = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    assert!(matches!(result.outcome, Outcome::NoMatch { .. }));
    assert_eq!(store.count("agent"), 0);
}

#[tokio::test]
async fn test_must_match_finds_existing_records() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let smith = store.seed("agent", indexmap! { "lastname".to_owned() => Value::String("Smith".into()) });

    let plan = json!({
        "baseTableName": "Agent",
        "uploadable": { "mustMatchTable": {
            "wbcols": { "lastname": "Last Name" }
        }}
    });
    let data = row(&[("Last Name", "Smith")]);
    let result = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    assert_eq!(result.record_id(), Some(smith));
}

#[tokio::test]
async fn test_ambiguous_matches_are_reported_not_resolved() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let first = store.seed("agent", indexmap! { "lastname".to_owned() => Value::String("Smith".into()) });
    let second = store.seed("agent", indexmap! { "lastname".to_owned() => Value::String("Smith".into()) });

    let plan = json!({
        "baseTableName": "Agent",
        "uploadable": { "uploadTable": {
            "wbcols": { "lastname": "Last Name" }
        }}
    });
    let data = row(&[("Last Name", "Smith")]);
    let result = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    let Outcome::MatchedMultiple { ref ids, .. } = result.outcome else {
        panic!("expected an ambiguous match, got {:?}", result.outcome);
    };
    assert_eq!(ids, &vec![first, second]);
    assert_eq!(store.count("agent"), 2);
}

#[tokio::test]
async fn test_force_create_skips_matching() {
    let metadata = metadata();
    let store = MemoryStore::new();
    store.seed("agent", indexmap! { "lastname".to_owned() => Value::String("Smith".into()) });

    let plan = json!({
        "baseTableName": "Agent",
        "uploadable": { "uploadTable": {
            "wbcols": { "lastname": "Last Name" }
        }}
    });
    let data = row(&[("Last Name", "Smith")]);
    let result = upload(&store, &metadata, &plan, &data, Mode::ForceCreate).await;
    assert!(matches!(result.outcome, Outcome::Uploaded { .. }));
    assert_eq!(store.count("agent"), 2);
}

#[tokio::test]
async fn test_evaluation_is_deterministic() {
    let metadata = metadata();
    let first_store = MemoryStore::new();
    let second_store = MemoryStore::new();
    let first = upload(&first_store, &metadata, &catalog_plan(), &catalog_row(), Mode::Create).await;
    let second = upload(&second_store, &metadata, &catalog_plan(), &catalog_row(), Mode::Create).await;
    assert_eq!(serde_json::to_value(&first).unwrap(), serde_json::to_value(&second).unwrap());
}

#[tokio::test]
async fn test_plan_round_trips_through_json() {
    let metadata = metadata();
    let plan = UploadPlan::parse(&metadata, &catalog_plan()).unwrap();
    let reparsed = UploadPlan::parse(&metadata, &plan.to_json()).unwrap();
    assert_eq!(plan, reparsed);
}

#[test]
fn test_scoping_assigns_dense_order_numbers() {
    let metadata = metadata();
    let plan = UploadPlan::parse(&metadata, &catalog_plan()).unwrap();
    let scoped = scoping::apply_scoping(&plan, &metadata, &collection()).unwrap();

    let scoping::ScopedUploadable::Table(root) = &scoped else {
        panic!("expected a table at the root");
    };
    let scoping::ScopedUploadable::Table(event) = &root.to_one["collectingevent"].uploadable else {
        panic!("expected a collecting event table");
    };
    let orders: Vec<_> = event.to_many["collectors"]
        .records
        .iter()
        .map(|record| record.statics.get("ordernumber").cloned())
        .collect();
    assert_eq!(orders, vec![Some(Value::Integer(0)), Some(Value::Integer(1))]);
}

#[tokio::test]
async fn test_savepoints_roll_the_row_back() {
    let store = MemoryStore::new();
    store.seed("agent", indexmap! { "lastname".to_owned() => Value::String("Smith".into()) });

    store.savepoint().await.unwrap();
    store
        .insert("agent", &indexmap! { "lastname".to_owned() => Value::String("Jones".into()) })
        .await
        .unwrap();
    assert_eq!(store.count("agent"), 2);
    store.rollback_savepoint().await.unwrap();
    assert_eq!(store.count("agent"), 1);

    store.savepoint().await.unwrap();
    store
        .insert("agent", &indexmap! { "lastname".to_owned() => Value::String("Brown".into()) })
        .await
        .unwrap();
    store.release_savepoint().await.unwrap();
    assert_eq!(store.count("agent"), 2);
}

#[tokio::test]
async fn test_tree_post_pass_numbers_and_fullnames() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let plan = json!({
        "baseTableName": "Taxon",
        "uploadable": { "treeRecord": {
            "ranks": {
                "Class": "Class",
                "Genus": "Genus",
                "Species": "Species"
            }
        }}
    });
    let data = row(&[("Class", "Gastropoda"), ("Genus", "Cepaea"), ("Species", "nemoralis")]);
    let result = upload(&store, &metadata, &plan, &data, Mode::Create).await;
    let species_id = result.record_id().unwrap();

    let definition = metadata.tree_definition(1, "taxon").unwrap();
    store.renumber_tree("taxon", definition.id).await.unwrap();
    store.reset_fullnames("taxon", definition).await.unwrap();

    // kingdom sentinel, class, genus, species: contiguous depth-first range
    let root = store
        .records("taxon")
        .into_iter()
        .find(|(_, node)| field(node, "parent") == &Value::Null)
        .unwrap();
    assert_eq!(field(&root.1, "nodenumber"), &Value::Integer(1));
    assert_eq!(field(&root.1, "highestchildnodenumber"), &Value::Integer(4));

    // genus and species are in the fullname, the others are not
    let species = store.record("taxon", species_id).unwrap();
    assert_eq!(field(&species, "fullname"), &Value::String("Cepaea nemoralis".into()));
}

#[tokio::test]
async fn test_result_serialization_shape() {
    let metadata = metadata();
    let store = MemoryStore::new();
    let result = upload(&store, &metadata, &catalog_plan(), &catalog_row(), Mode::Create).await;
    let value = serde_json::to_value(&result).unwrap();

    let uploaded = &value["outcome"]["uploaded"];
    assert!(uploaded["id"].is_i64());
    assert_eq!(uploaded["info"]["tableName"], json!("Collectionobject"));
    assert_eq!(uploaded["info"]["columns"], json!(["BMSM No."]));
    assert!(value["toOne"]["collectingevent"]["outcome"]["uploaded"]["picklistAdditions"][0]["picklistId"].is_i64());
    assert!(value["toMany"]["determinations"][0]["toOne"]["taxon"]["outcome"]["uploaded"]["id"].is_i64());
}
