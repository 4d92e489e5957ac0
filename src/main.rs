use anyhow::Context;
use clap::Parser;
use indexmap::IndexMap;
use tracing::{debug, error, info};

use wb_uploader::{
    plan::{UploadPlan, scoping},
    store::{Store, sqlite::SqliteStore},
    upload::{Mode, Uploader},
};

/// Upload a staged dataset into the collection database.
#[derive(Parser)]
struct Opts {
    /// Database holding the staged dataset and the collection records.
    #[clap(long, env = "WB_DATABASE_URL")]
    database: String,
    collection_id: i64,
    dataset_id: i64,
    /// Commit the changes instead of validating only.
    #[clap(long)]
    commit: bool,
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let store = SqliteStore::open(&opts.database).await.context("open database")?;
    let metadata = store.load_metadata().await.context("load schema metadata")?;
    let collection = store.load_collection(opts.collection_id).await?;
    let dataset = store.load_dataset(opts.dataset_id).await?;

    let plan = UploadPlan::parse(&metadata, &dataset.plan)?;
    let scoped = scoping::apply_scoping(&plan, &metadata, &collection)?;

    store.begin().await?;
    let uploader = Uploader::new(&store, &metadata);
    let mut results = Vec::with_capacity(dataset.rows.len());
    for (index, row) in dataset.rows.iter().enumerate() {
        let bound = scoped.bind(row)?;
        store.savepoint().await?;
        match uploader.upload_row(bound, Mode::Create).await {
            Ok(result) => {
                store.release_savepoint().await?;
                debug!(row = index, failed = result.contains_failure(), "row processed");
                results.push(result);
            }
            Err(store_error) => {
                // infrastructure failure: abort the row and the whole run
                store.rollback_savepoint().await.ok();
                store.rollback().await.ok();
                return Err(store_error).with_context(|| format!("uploading row {index}"));
            }
        }
    }

    // tree post-pass: contiguous node numbers and fresh fullnames
    let mut trees = IndexMap::new();
    for tree in scoped.trees() {
        trees.entry(tree.treedef_id).or_insert(tree);
    }
    for tree in trees.values() {
        store.renumber_tree(&tree.name, tree.treedef_id).await?;
        if let Some(definition) = metadata.tree_definition(collection.discipline_id, &tree.name) {
            store.reset_fullnames(&tree.name, definition).await?;
        }
    }

    if opts.commit {
        store.commit().await?;
        info!("committed");
    } else {
        store.rollback().await?;
        info!("validating only, rolled back");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(error) = run(opts).await {
        error!(?error, "upload failed");
        std::process::exit(1);
    }
}
