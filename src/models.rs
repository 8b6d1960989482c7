//! Modelos de dominio: páginas, chunks, chunks indexados y resultados de extracción.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Valor que el modelo usa cuando el atributo no aparece en los fragmentos.
pub const NOT_FOUND: &str = "not found";

/// Una página física con texto extraíble (numeración 1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

/// Trozo de texto de una página, unidad atómica de embedding y recuperación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(rename = "page")]
    pub page_number: u32,
    /// Ordinal dentro de la página; reinicia en 0 en cada página.
    pub chunk_index: u32,
    /// Identificador del documento de origen (nombre del fichero).
    pub source: String,
}

/// Chunk persistido en una colección, con su embedding e id `chunk_<i>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Un resultado de una consulta k-NN; menor distancia = mejor.
#[derive(Debug, Clone, Copy)]
pub struct QueryHit<'a> {
    pub chunk: &'a IndexedChunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Interpreta "high" / "medium" / "low" sin distinguir mayúsculas.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resultado de extraer un atributo. `value == "not found"` es un estado
/// terminal válido, no un error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Es la clave en el `ResultSet`, por eso no se repite al serializar.
    #[serde(default, skip_serializing)]
    pub attribute_name: String,
    pub value: String,
    pub confidence: Confidence,
    pub reasoning: String,
    /// Páginas distintas de los chunks recuperados, en orden de aparición.
    pub source_pages: Vec<u32>,
    pub source_chunks: Vec<String>,
    /// Distancia del mejor chunk recuperado. Sólo informativa: no altera la
    /// confianza declarada por el modelo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_distance: Option<f32>,
}

/// Conjunto de resultados indexado por nombre de atributo, en orden de inserción.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    entries: Vec<ExtractionResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta un resultado. Devuelve `false` (y no inserta) si ya existe
    /// un resultado para ese atributo.
    pub fn insert(&mut self, result: ExtractionResult) -> bool {
        if self.contains(&result.attribute_name) {
            return false;
        }
        self.entries.push(result);
        true
    }

    pub fn contains(&self, attribute_name: &str) -> bool {
        self.get(attribute_name).is_some()
    }

    pub fn get(&self, attribute_name: &str) -> Option<&ExtractionResult> {
        self.entries
            .iter()
            .find(|r| r.attribute_name == attribute_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|r| r.attribute_name.as_str())
    }
}

// Se serializa como objeto JSON `{ atributo: resultado }` preservando el orden.
impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.attribute_name, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResultSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResultSetVisitor;

        impl<'de> Visitor<'de> for ResultSetVisitor {
            type Value = ResultSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("un objeto { atributo: resultado }")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ResultSet, A::Error> {
                let mut set = ResultSet::new();
                while let Some((name, mut result)) =
                    access.next_entry::<String, ExtractionResult>()?
                {
                    result.attribute_name = name;
                    set.insert(result);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(ResultSetVisitor)
    }
}
