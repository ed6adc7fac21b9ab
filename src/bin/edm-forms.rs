//! EDM Forms CLI
//!
//! Command-line interface for inspecting EDM schemas, compiling entity forms
//! and running CRUD calls against an OData-style service.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use edm_forms::{
    compile, compile_resolved, endpoint_of, is_url, json_type_name, load_metadata,
    load_metadata_auto, render_form, schema_validator, CacheConfig, CachePolicy, CrudClient,
    CrudError, EntityDescriptor, FieldRegistry, FormState, HttpTransport, ListQuery,
    MetadataCache, MetadataError, RendererConfig, RendererResolver, SchemaDocument, Transport,
    Values,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edm-forms")]
#[command(about = "Compile forms and run CRUD calls from EDM/OData metadata")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Transport timeout in seconds
    #[arg(long, global = true, env = "EDM_FORMS_TIMEOUT_SECS", default_value_t = 30)]
    timeout: u64,

    /// Metadata cache lifetime in seconds
    #[arg(long, global = true, env = "EDM_FORMS_CACHE_TTL_SECS", default_value_t = 300)]
    cache_ttl: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entity types of a schema document
    Entities {
        /// Metadata source: file path or service URL (http:// or https://)
        source: String,
    },

    /// Print the parsed descriptor of one entity type
    Inspect {
        /// Metadata source: file path or service URL
        source: String,

        /// Entity type name (case-sensitive)
        entity: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Compile an entity type into form fields and defaults
    Compile {
        /// Metadata source: file path or service URL
        source: String,

        /// Entity type name (case-sensitive)
        entity: String,

        /// Fetch select options from the related collections
        #[arg(long)]
        resolve_options: bool,

        /// Service root for option lookups (defaults to a URL source)
        #[arg(long, env = "EDM_FORMS_ENDPOINT")]
        endpoint: Option<String>,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Render the form of an entity type, optionally filled and validated
    Form {
        /// Metadata source: file path or service URL
        source: String,

        /// Entity type name (case-sensitive)
        entity: String,

        /// JSON file with initial values
        #[arg(long)]
        values: Option<PathBuf>,

        /// Validate the values and fail if any field is invalid
        #[arg(long)]
        validate: bool,
    },

    /// List instances of an entity collection
    List {
        entity: String,

        #[command(flatten)]
        service: Service,

        /// $filter expression
        #[arg(long)]
        filter: Option<String>,

        /// Fields to select (comma separated)
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,

        /// Navigations to expand (comma separated)
        #[arg(long, value_delimiter = ',')]
        expand: Vec<String>,

        /// $orderby expression
        #[arg(long)]
        orderby: Option<String>,

        #[arg(long)]
        top: Option<u64>,

        #[arg(long)]
        skip: Option<u64>,

        /// Ask the server for the total count
        #[arg(long)]
        count: bool,
    },

    /// Fetch one instance by key
    Get {
        entity: String,

        /// Key value; integers and GUIDs are sent bare, anything else quoted.
        /// Pass a quoted literal ('42') for a numeric string key
        key: String,

        #[command(flatten)]
        service: Service,

        /// Navigations to expand
        #[arg(long)]
        expand: Option<String>,
    },

    /// Create an instance
    Create {
        entity: String,

        #[command(flatten)]
        service: Service,

        #[command(flatten)]
        payload: Payload,
    },

    /// Replace an instance
    Update {
        entity: String,

        key: String,

        #[command(flatten)]
        service: Service,

        #[command(flatten)]
        payload: Payload,
    },

    /// Partially update an instance
    Patch {
        entity: String,

        key: String,

        #[command(flatten)]
        service: Service,

        #[command(flatten)]
        payload: Payload,
    },

    /// Delete an instance
    Delete {
        entity: String,

        key: String,

        #[command(flatten)]
        service: Service,
    },
}

#[derive(Args)]
struct Service {
    /// Service root URL (e.g. https://host/odata)
    #[arg(long, env = "EDM_FORMS_ENDPOINT")]
    endpoint: String,
}

#[derive(Args)]
struct Payload {
    /// JSON body, or @path to read it from a file
    #[arg(long)]
    data: String,
}

/// Shared network state for one invocation.
struct App {
    transport: Arc<dyn Transport>,
    cache: MetadataCache,
}

impl App {
    fn client(&self, endpoint: &str) -> CrudClient {
        CrudClient::new(endpoint, self.transport.clone())
            .with_cache_policy(CachePolicy::Shared(self.cache.clone()))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let transport = match HttpTransport::builder()
        .timeout(Duration::from_secs(cli.timeout))
        .build()
    {
        Ok(transport) => Arc::new(transport) as Arc<dyn Transport>,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(3);
        }
    };
    let config = CacheConfig::default().ttl(Duration::from_secs(cli.cache_ttl));
    let app = App {
        cache: MetadataCache::with_config(transport.clone(), config),
        transport,
    };

    let result = match cli.command {
        Commands::Entities { source } => run_entities(&app, &source).await,

        Commands::Inspect {
            source,
            entity,
            pretty,
        } => run_inspect(&app, &source, &entity, pretty).await,

        Commands::Compile {
            source,
            entity,
            resolve_options,
            endpoint,
            output,
            pretty,
        } => {
            run_compile(
                &app,
                &source,
                &entity,
                resolve_options.then_some(endpoint),
                output,
                pretty,
            )
            .await
        }

        Commands::Form {
            source,
            entity,
            values,
            validate,
        } => run_form(&app, &source, &entity, values.as_deref(), validate).await,

        Commands::List {
            entity,
            service,
            filter,
            select,
            expand,
            orderby,
            top,
            skip,
            count,
        } => {
            let mut query = ListQuery::new().select(select).expand(expand).count(count);
            query.filter = filter;
            query.orderby = orderby;
            query.top = top;
            query.skip = skip;
            run_list(&app, &service.endpoint, &entity, &query).await
        }

        Commands::Get {
            entity,
            key,
            service,
            expand,
        } => run_get(&app, &service.endpoint, &entity, &key, expand.as_deref()).await,

        Commands::Create {
            entity,
            service,
            payload,
        } => run_create(&app, &service.endpoint, &entity, &payload.data).await,

        Commands::Update {
            entity,
            key,
            service,
            payload,
        } => run_write(&app, &service.endpoint, &entity, &key, &payload.data, false).await,

        Commands::Patch {
            entity,
            key,
            service,
            payload,
        } => run_write(&app, &service.endpoint, &entity, &key, &payload.data, true).await,

        Commands::Delete {
            entity,
            key,
            service,
        } => run_delete(&app, &service.endpoint, &entity, &key).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("edm_forms=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_entities(app: &App, source: &str) -> Result<(), u8> {
    let xml = load_metadata_auto(app.transport.as_ref(), source)
        .await
        .map_err(metadata_failure)?;
    let doc = SchemaDocument::parse(&xml).map_err(metadata_failure)?;

    for name in doc.entity_names() {
        println!("{}", name);
    }
    Ok(())
}

async fn run_inspect(app: &App, source: &str, entity: &str, pretty: bool) -> Result<(), u8> {
    let descriptor = load_descriptor(app, source, entity).await?;
    print_json(descriptor.as_ref(), pretty, None)
}

async fn run_compile(
    app: &App,
    source: &str,
    entity: &str,
    resolve_options: Option<Option<String>>,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let descriptor = load_descriptor(app, source, entity).await?;

    let compiled = match resolve_options {
        None => compile(&descriptor),
        Some(endpoint) => {
            let endpoint = match endpoint {
                Some(endpoint) => endpoint,
                None if is_url(source) => endpoint_of(source).to_string(),
                None => {
                    eprintln!("Error: --resolve-options needs --endpoint for a file source");
                    return Err(2);
                }
            };
            compile_resolved(&app.client(&endpoint), &descriptor).await
        }
    };

    print_json(&compiled, pretty, output.as_deref())
}

async fn run_form(
    app: &App,
    source: &str,
    entity: &str,
    values: Option<&Path>,
    validate: bool,
) -> Result<(), u8> {
    let descriptor = load_descriptor(app, source, entity).await?;
    let compiled = compile(&descriptor);

    let validator = schema_validator(&compiled).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    let mut state = FormState::from_compiled(&compiled).with_validator(validator);
    if let Some(path) = values {
        let initial = read_values(path)?;
        state = state.with_initial_values(&initial);
    }

    let valid = !validate || state.validate_fields();

    let registry = FieldRegistry::from_compiled(&compiled);
    let resolver = RendererResolver::new(Arc::new(RendererConfig::standard()));
    for line in render_form(&registry, &state, &resolver) {
        println!("{}", line);
    }

    if valid {
        Ok(())
    } else {
        Err(1)
    }
}

async fn run_list(app: &App, endpoint: &str, entity: &str, query: &ListQuery) -> Result<(), u8> {
    let page = app
        .client(endpoint)
        .list(entity, query)
        .await
        .map_err(crud_failure)?;
    print_json(&page, true, None)
}

async fn run_get(
    app: &App,
    endpoint: &str,
    entity: &str,
    key: &str,
    expand: Option<&str>,
) -> Result<(), u8> {
    match app
        .client(endpoint)
        .get_by_id(entity, key, expand)
        .await
        .map_err(crud_failure)?
    {
        Some(item) => print_json(&item, true, None),
        None => {
            eprintln!("Error: {}({}) not found", entity, key);
            Err(2)
        }
    }
}

async fn run_create(app: &App, endpoint: &str, entity: &str, data: &str) -> Result<(), u8> {
    let payload = read_payload(data)?;
    let created = app
        .client(endpoint)
        .create(entity, &payload)
        .await
        .map_err(crud_failure)?;
    print_json(&created, true, None)
}

async fn run_write(
    app: &App,
    endpoint: &str,
    entity: &str,
    key: &str,
    data: &str,
    partial: bool,
) -> Result<(), u8> {
    let payload = read_payload(data)?;
    let client = app.client(endpoint);
    let written = if partial {
        client.patch(entity, key, &payload).await
    } else {
        client.update(entity, key, &payload).await
    }
    .map_err(crud_failure)?;

    match written {
        Some(body) => print_json(&body, true, None),
        None => {
            println!("Updated {}({})", entity, key);
            Ok(())
        }
    }
}

async fn run_delete(app: &App, endpoint: &str, entity: &str, key: &str) -> Result<(), u8> {
    app.client(endpoint)
        .remove(entity, key)
        .await
        .map_err(crud_failure)?;
    println!("Deleted {}({})", entity, key);
    Ok(())
}

/// Descriptor from a service (through the cache) or a local file.
async fn load_descriptor(
    app: &App,
    source: &str,
    entity: &str,
) -> Result<Arc<EntityDescriptor>, u8> {
    if is_url(source) {
        return app
            .cache
            .get(endpoint_of(source), entity, false)
            .await
            .map_err(metadata_failure);
    }

    let xml = load_metadata(Path::new(source)).map_err(metadata_failure)?;
    let doc = SchemaDocument::parse(&xml).map_err(metadata_failure)?;
    doc.entity(entity)
        .cloned()
        .map(Arc::new)
        .ok_or_else(|| {
            metadata_failure(MetadataError::EntityNotFound {
                endpoint: source.to_string(),
                entity: entity.to_string(),
            })
        })
}

fn read_values(path: &Path) -> Result<Values, u8> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading {}: {}", path.display(), e);
        3u8
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        eprintln!("Error: invalid JSON in {}: {}", path.display(), e);
        2u8
    })?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => {
            eprintln!(
                "Error: {} must contain a JSON object, found {}",
                path.display(),
                json_type_name(&other)
            );
            Err(2)
        }
    }
}

/// `--data` is inline JSON or `@path`.
fn read_payload(data: &str) -> Result<Value, u8> {
    let text = match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            eprintln!("Error reading {}: {}", path, e);
            3u8
        })?,
        None => data.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| {
        eprintln!("Error: invalid JSON payload: {}", e);
        2u8
    })
}

fn print_json<T: Serialize + ?Sized>(
    value: &T,
    pretty: bool,
    output: Option<&Path>,
) -> Result<(), u8> {
    let json_output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn metadata_failure(e: MetadataError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

/// Validation failures print the field map on stdout for automation.
fn crud_failure(e: CrudError) -> u8 {
    if let Some(errors) = e.validation_errors() {
        println!("{}", serde_json::json!({ "valid": false, "errors": errors }));
        eprintln!("Validation failed:");
        for (field, message) in errors {
            eprintln!("  {}: {}", field, message);
        }
    } else {
        eprintln!("Error: {}", e);
    }
    e.exit_code() as u8
}
