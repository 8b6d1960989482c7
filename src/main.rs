use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use legal_rag_extractor::{
    api,
    app_state::AppState,
    collection_store,
    config::AppConfig,
    embeddings,
    error::Error,
    ingest::{self, IngestOptions},
    llm::LlmManager,
    rag::AttributeExtractor,
    results,
    vector_store::{VectorIndex, VectorStore},
};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Extrae atributos de documentos legales en PDF mediante RAG.
#[derive(Parser)]
#[command(name = "legal-rag-extractor", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Indexa un PDF (reemplaza la colección configurada).
    Index {
        pdf: PathBuf,
    },
    /// Muestra los chunks más cercanos a una consulta.
    Query {
        text: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Extrae atributos del documento indexado.
    Extract {
        /// Nombres de atributo o preguntas completas.
        attributes: Vec<String>,
        #[arg(short, long)]
        k: Option<usize>,
        /// Fichero JSON de salida (por defecto RESULTS_PATH).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Arranca la API HTTP.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Embeddings y almacenamiento de colecciones
    let embedder = embeddings::build_embedder(&cfg).context("Error inicializando embeddings")?;
    let store = collection_store::open_store(&cfg)
        .await
        .context("Error abriendo el almacenamiento de colecciones")?;
    let vector_store = VectorStore::new(embedder, store).with_timeout(cfg.embedding_timeout);

    // 4. Inicializar el extractor
    let extractor = AttributeExtractor::new(Arc::new(LlmManager::from_config(&cfg)))
        .with_top_k(cfg.top_k)
        .with_timeout(cfg.llm_timeout);

    match cli.command {
        Command::Index { pdf } => index_document(&cfg, &vector_store, pdf).await,
        Command::Query { text, k } => {
            let index = vector_store.load(&cfg.collection_name).await?;
            let hits = index.query(&text, k.unwrap_or(cfg.top_k)).await?;
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "#{} [{}] página {} (distancia {:.4})\n{}\n",
                    rank + 1,
                    hit.chunk.id,
                    hit.chunk.chunk.page_number,
                    hit.distance,
                    hit.chunk.chunk.text
                );
            }
            Ok(())
        }
        Command::Extract {
            attributes,
            k,
            output,
        } => {
            let index = vector_store.load(&cfg.collection_name).await?;
            let attributes = if attributes.is_empty() {
                results::DEFAULT_ATTRIBUTES
                    .iter()
                    .map(|a| a.to_string())
                    .collect()
            } else {
                attributes
            };
            let extractor = extractor.with_top_k(k.unwrap_or(cfg.top_k));

            let set = results::extract_all(&extractor, &index, &attributes).await?;
            for result in set.iter() {
                println!("{}", result.attribute_name);
                println!("  Valor:      {}", result.value);
                println!("  Confianza:  {}", result.confidence);
                println!("  Motivo:     {}", result.reasoning);
                println!("  Páginas:    {:?}\n", result.source_pages);
            }

            let output = output.unwrap_or_else(|| cfg.results_path.clone());
            results::save_results(&set, &output).await?;
            Ok(())
        }
        Command::Serve => serve(cfg, vector_store, extractor).await,
    }
}

async fn index_document(
    cfg: &AppConfig,
    vector_store: &VectorStore,
    pdf: PathBuf,
) -> anyhow::Result<()> {
    let opts = IngestOptions::from_config(cfg);
    let document = tokio::task::spawn_blocking(move || ingest::ingest_pdf_path(&pdf, &opts))
        .await
        .context("la tarea de lectura del PDF falló")??;

    println!("{}", document.summary);
    let index = vector_store
        .build(&cfg.collection_name, document.chunks)
        .await?;
    println!(
        "Colección '{}' lista: {} chunks de '{}'.",
        index.name(),
        index.len(),
        document.source
    );
    Ok(())
}

async fn serve(
    cfg: AppConfig,
    vector_store: VectorStore,
    extractor: AttributeExtractor,
) -> anyhow::Result<()> {
    // Índice existente, si lo hay
    let index: Option<VectorIndex> = match vector_store.load(&cfg.collection_name).await {
        Ok(index) => Some(index),
        Err(Error::CollectionNotFound(name)) => {
            info!("La colección '{name}' aún no existe; se creará al subir un PDF.");
            None
        }
        Err(e) => {
            warn!("No se pudo cargar la colección '{}': {e}", cfg.collection_name);
            None
        }
    };

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app_state = AppState::new(cfg.clone(), vector_store, extractor, index, shutdown_tx);

    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
