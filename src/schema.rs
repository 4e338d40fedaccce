//! Dataset identification and column-schema resolution
//!
//! Published headers for some Receita datasets are unreliable (and most
//! data files carry none at all), so a fixed column dictionary takes
//! precedence whenever its length matches what the file actually
//! contains. Resolution is total: it always terminates with some schema,
//! degrading to positional names at worst.

use crate::{config::Config, error::SchemaError};
use csv_async::{AsyncReaderBuilder, StringRecord};
use futures::StreamExt;
use std::{collections::HashMap, path::Path};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
};

/// Records sampled when observing the column count
const SAMPLE_ROWS: usize = 5;

/// Bytes after which the header heuristic gives up on finding a newline
const FIRST_LINE_BYTES: u64 = 64 * 1024;

/// Semantic family of a dump file, inferred from its name
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DatasetKind {
    Empresas,
    Estabelecimentos,
    Socios,
    Simples,
    Cnaes,
    Municipios,
    Naturezas,
    Motivos,
    Paises,
    Qualificacoes,
    /// Not a known family; resolution falls back to the source itself
    Unknown,
}
//
impl DatasetKind {
    /// Infer the dataset family from a file name
    ///
    /// Total function over an explicit ordered keyword table, first match
    /// wins, unrecognized names map to [`DatasetKind::Unknown`]. The
    /// table knows both the archive-name families (`Empresas0.zip`) and
    /// the tokens used inside the archives (`F.K03200$Z.D50712.MUNICCSV`).
    pub fn detect(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        DETECTION_TABLE
            .iter()
            .find(|(_kind, keywords)| keywords.iter().any(|keyword| name.contains(keyword)))
            .map(|(kind, _keywords)| *kind)
            .unwrap_or(Self::Unknown)
    }

    /// Canonical lowercase label, as used in logs and artifact prefixes
    pub fn label(self) -> &'static str {
        match self {
            Self::Empresas => "empresas",
            Self::Estabelecimentos => "estabelecimentos",
            Self::Socios => "socios",
            Self::Simples => "simples",
            Self::Cnaes => "cnaes",
            Self::Municipios => "municipios",
            Self::Naturezas => "naturezas",
            Self::Motivos => "motivos",
            Self::Paises => "paises",
            Self::Qualificacoes => "qualificacoes",
            Self::Unknown => "unknown",
        }
    }

    /// Column dictionary of the family, if its layout is known
    ///
    /// These are the published Receita layouts; they win over an in-file
    /// header whenever their length matches the observed column count.
    pub fn fixed_columns(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Empresas => Some(EMPRESAS_COLUMNS),
            Self::Estabelecimentos => Some(ESTABELECIMENTOS_COLUMNS),
            Self::Socios => Some(SOCIOS_COLUMNS),
            Self::Simples => Some(SIMPLES_COLUMNS),
            Self::Cnaes
            | Self::Municipios
            | Self::Naturezas
            | Self::Motivos
            | Self::Paises
            | Self::Qualificacoes => Some(CODE_DESCRIPTION_COLUMNS),
            Self::Unknown => None,
        }
    }
}

/// Ordered keyword table backing [`DatasetKind::detect`]
const DETECTION_TABLE: &[(DatasetKind, &[&str])] = &[
    (DatasetKind::Empresas, &["empresas", "emprecsv"]),
    (DatasetKind::Estabelecimentos, &["estabele", "estabcsv"]),
    (DatasetKind::Simples, &["simples"]),
    (DatasetKind::Cnaes, &["cnaes", "cnae"]),
    (
        DatasetKind::Municipios,
        &["municipios", "municípios", "municipio", "municcsv"],
    ),
    (
        DatasetKind::Naturezas,
        &["naturezas", "natureza", "natjucsv"],
    ),
    (DatasetKind::Motivos, &["motivos", "motivo", "moticsv"]),
    (
        DatasetKind::Socios,
        &["socios", "sócios", "socioscsv", "sociocsv"],
    ),
    (DatasetKind::Paises, &["paises", "países", "pais"]),
    (
        DatasetKind::Qualificacoes,
        &["qualificacoes", "qualificações", "qualif", "qualscsv"],
    ),
];

/// Published layout of the Empresas files
const EMPRESAS_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "razao_social",
    "natureza_juridica",
    "qualificacao_responsavel",
    "capital_social_empresa",
    "porte_empresa",
    "ente_federativo_responsavel",
];

/// Published layout of the Estabelecimentos files
const ESTABELECIMENTOS_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "cnpj_ordem",
    "cnpj_dv",
    "identificador_matriz_filial",
    "nome_fantasia",
    "situacao_cadastral",
    "data_situacao_cadastral",
    "motivo_situacao_cadastral",
    "nome_cidade_exterior",
    "pais",
    "data_inicio_atividade",
    "cnae_fiscal_principal",
    "cnae_fiscal_secundaria",
    "tipo_logradouro",
    "logradouro",
    "numero",
    "complemento",
    "bairro",
    "cep",
    "uf",
    "municipio",
    "ddd_1",
    "telefone_1",
    "ddd_2",
    "telefone_2",
    "ddd_fax",
    "fax",
    "correio_eletronico",
    "situacao_especial",
    "data_situacao_especial",
];

/// Published layout of the Socios files
const SOCIOS_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "identificador_socio",
    "nome_socio_ou_razao_social",
    "cnpj_cpf_socio",
    "qualificacao_socio",
    "data_entrada_sociedade",
    "pais",
    "representante_legal",
    "nome_representante",
    "qualificacao_representante_legal",
    "faixa_etaria",
];

/// Published layout of the Simples Nacional files
const SIMPLES_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "opcao_simples",
    "data_opcao_simples",
    "data_exclusao_simples",
    "opcao_mei",
    "data_opcao_mei",
    "data_exclusao_mei",
];

/// Published layout of the code/description lookup tables
const CODE_DESCRIPTION_COLUMNS: &[&str] = &["codigo", "descricao"];

/// Final column layout decided for one archive's output
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnSchema {
    /// Normalized, collision-free names, one per source column
    pub names: Vec<String>,

    /// Truth that the source's first line looks like a header row
    pub has_header: bool,

    /// Where the names came from
    pub origin: SchemaOrigin,
}

/// Provenance of a resolved column list
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchemaOrigin {
    /// Fixed dictionary of a recognized dataset family
    Fixed,

    /// Header row of the source file (the converter must skip it)
    Header,

    /// Synthesized positional names (degraded resolution)
    Synthetic,
}

/// Resolve the column schema to apply to a normalized text file
///
/// Precedence: the family's fixed dictionary when its length matches the
/// observed column count, even over a present header row (published
/// headers are unreliable), then a detected header row, then positional
/// names.
pub async fn resolve(
    path: &Path,
    kind: DatasetKind,
    config: &Config,
) -> Result<ColumnSchema, SchemaError> {
    // Header heuristic over the raw first line
    let first_line = read_first_line(path).await.map_err(|source| SchemaError::Io {
        path: path.to_owned(),
        source,
    })?;
    let has_header = looks_like_header(&first_line, config.delimiter);

    // Observe the column count on a small parsed sample
    let sample = sample_records(path, config).await?;
    let observed = sample.first().map(StringRecord::len).unwrap_or(0);

    let (names, origin) = match kind.fixed_columns() {
        Some(fixed) if fixed.len() == observed => {
            log::info!(
                "Applying the {} column dictionary ({} columns) to {}",
                kind.label(),
                fixed.len(),
                path.display()
            );
            (
                fixed.iter().map(|&name| name.to_owned()).collect(),
                SchemaOrigin::Fixed,
            )
        }
        _ if has_header => {
            log::info!("Keeping the source header of {}", path.display());
            let header = sample.first().expect("a detected header implies a first record");
            (
                header
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| fallback_positional(normalize_name(name), idx))
                    .collect(),
                SchemaOrigin::Header,
            )
        }
        _ => {
            log::warn!(
                "No usable header or dictionary for {} ({} columns observed), \
                 synthesizing positional names",
                path.display(),
                observed
            );
            ((0..observed).map(positional_name).collect(), SchemaOrigin::Synthetic)
        }
    };
    Ok(ColumnSchema {
        names: disambiguate(names),
        has_header,
        origin,
    })
}

/// Read the raw first line of a file, bounded
async fn read_first_line(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path).await?).take(FIRST_LINE_BYTES);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    // Byte-per-byte scalar decoding is fine for a yes/no heuristic,
    // whether the actual encoding is UTF-8 or Latin-1
    Ok(line.iter().map(|&byte| char::from(byte)).collect())
}

/// Truth that a first line looks like a header row
///
/// A label row carries the field delimiter plus at least one alphabetic
/// character; a pure-data row of numeric codes does not.
fn looks_like_header(line: &str, delimiter: u8) -> bool {
    line.contains(char::from(delimiter)) && line.chars().any(char::is_alphabetic)
}

/// Parse a handful of records to observe the column count
async fn sample_records(path: &Path, config: &Config) -> Result<Vec<StringRecord>, SchemaError> {
    let file = File::open(path).await.map_err(|source| SchemaError::Io {
        path: path.to_owned(),
        source,
    })?;
    let mut reader = AsyncReaderBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote)
        .has_headers(false)
        .flexible(true)
        .create_reader(file);
    let mut records = reader.records();
    let mut sample = Vec::with_capacity(SAMPLE_ROWS);
    while let Some(record) = records.next().await {
        sample.push(record.map_err(|source| SchemaError::Csv {
            path: path.to_owned(),
            source,
        })?);
        if sample.len() >= SAMPLE_ROWS {
            break;
        }
    }
    Ok(sample)
}

/// Normalize one column name to its canonical form
///
/// Lowercases, folds Latin-1 accents to plain ASCII and collapses every
/// run of other characters into a single `_`, trimmed from both ends.
fn normalize_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for lowered in raw.chars().flat_map(char::to_lowercase) {
        let folded = fold_accent(lowered);
        if folded.is_ascii_alphanumeric() {
            if pending_separator && !name.is_empty() {
                name.push('_');
            }
            pending_separator = false;
            name.push(folded);
        } else {
            pending_separator = true;
        }
    }
    name
}

/// Fold the Latin-1 accented range to plain ASCII
fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Positional name of column `idx`
fn positional_name(idx: usize) -> String {
    format!("col_{idx:02}")
}

/// Replace an unusable normalized header name by its positional fallback
fn fallback_positional(name: String, idx: usize) -> String {
    if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
        positional_name(idx)
    } else {
        name
    }
}

/// Disambiguate duplicate names with a numeric suffix (`a`, `a_2`, `a_3`)
fn disambiguate(names: Vec<String>) -> Vec<String> {
    let mut seen = HashMap::<String, usize>::new();
    names
        .into_iter()
        .map(|name| {
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name}_{}", *count)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn detection_knows_archive_names_and_member_tokens() {
        assert_eq!(DatasetKind::detect("Empresas3.zip"), DatasetKind::Empresas);
        assert_eq!(
            DatasetKind::detect("Estabelecimentos0.zip"),
            DatasetKind::Estabelecimentos
        );
        assert_eq!(DatasetKind::detect("Simples.zip"), DatasetKind::Simples);
        assert_eq!(
            DatasetKind::detect("F.K03200$Z.D50712.MUNICCSV.csv"),
            DatasetKind::Municipios
        );
        assert_eq!(
            DatasetKind::detect("K3241.K03200Y0.D50712.EMPRECSV.csv"),
            DatasetKind::Empresas
        );
        assert_eq!(
            DatasetKind::detect("F.K03200$Z.D50712.NATJUCSV"),
            DatasetKind::Naturezas
        );
        assert_eq!(DatasetKind::detect("Qualificacoes.zip"), DatasetKind::Qualificacoes);
        assert_eq!(DatasetKind::detect("Motivos.zip"), DatasetKind::Motivos);
        assert_eq!(DatasetKind::detect("whatever.zip"), DatasetKind::Unknown);
    }

    #[test]
    fn normalization_folds_accents_and_collapses_runs() {
        assert_eq!(normalize_name("Código"), "codigo");
        assert_eq!(normalize_name("Descrição"), "descricao");
        assert_eq!(normalize_name("  Razão  Social!! "), "razao_social");
        assert_eq!(normalize_name("cnpj/cpf do sócio"), "cnpj_cpf_do_socio");
        assert_eq!(normalize_name("___"), "");
    }

    #[test]
    fn duplicate_names_get_numeric_suffixes() {
        let names = vec!["codigo".to_owned(), "codigo".to_owned(), "codigo".to_owned()];
        assert_eq!(disambiguate(names), ["codigo", "codigo_2", "codigo_3"]);
    }

    #[test]
    fn header_heuristic_wants_delimiter_and_letters() {
        assert!(looks_like_header("codigo;descricao", b';'));
        assert!(!looks_like_header("123;456", b';'));
        assert!(!looks_like_header("no delimiter here", b';'));
        assert!(looks_like_header("01;ABADIA DE GOIAS", b';'));
    }

    fn test_config(dir: &TempDir) -> std::sync::Arc<Config> {
        Config::for_tests(
            "http://localhost/dump/",
            dir.path().to_owned(),
            PathBuf::from("/unused"),
        )
    }

    async fn resolve_content(content: &str, kind: DatasetKind) -> ColumnSchema {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let path = dir.path().join("dados.csv");
        std::fs::write(&path, content).expect("test input");
        resolve(&path, kind, &test_config(&dir))
            .await
            .expect("resolution should succeed")
    }

    #[tokio::test]
    async fn fixed_dictionary_wins_over_a_differing_header() {
        let schema = resolve_content(
            "Code;Description\n01;ABADIA DE GOIAS\n02;ABADIANIA\n",
            DatasetKind::Municipios,
        )
        .await;
        assert_eq!(schema.names, ["codigo", "descricao"]);
        assert_eq!(schema.origin, SchemaOrigin::Fixed);
        assert!(schema.has_header);
    }

    #[tokio::test]
    async fn fixed_dictionary_applies_to_headerless_data() {
        let schema = resolve_content(
            "123;\"ACME LTDA\";2046;10;1000,00;03;\n",
            DatasetKind::Empresas,
        )
        .await;
        assert_eq!(schema.names, EMPRESAS_COLUMNS);
        assert_eq!(schema.origin, SchemaOrigin::Fixed);
    }

    #[tokio::test]
    async fn mismatched_dictionary_defers_to_the_header() {
        // Municipios expects 2 columns; this file has 3 plus a header
        let schema = resolve_content(
            "Código;Descrição;UF\n1;ABADIA;GO\n",
            DatasetKind::Municipios,
        )
        .await;
        assert_eq!(schema.names, ["codigo", "descricao", "uf"]);
        assert_eq!(schema.origin, SchemaOrigin::Header);
        assert!(schema.has_header);
    }

    #[tokio::test]
    async fn unknown_headerless_data_gets_positional_names() {
        let schema = resolve_content("1;2;3;4;5\n6;7;8;9;10\n", DatasetKind::Unknown).await;
        assert_eq!(schema.names, ["col_00", "col_01", "col_02", "col_03", "col_04"]);
        assert_eq!(schema.origin, SchemaOrigin::Synthetic);
        assert!(!schema.has_header);
    }

    #[tokio::test]
    async fn numeric_and_empty_header_cells_fall_back_to_positions() {
        let schema = resolve_content("nome;;123\na;b;c\n", DatasetKind::Unknown).await;
        assert_eq!(schema.names, ["nome", "col_01", "col_02"]);
        assert_eq!(schema.origin, SchemaOrigin::Header);
    }

    #[tokio::test]
    async fn duplicate_header_cells_are_disambiguated() {
        let schema = resolve_content("codigo;codigo\n1;2\n", DatasetKind::Unknown).await;
        assert_eq!(schema.names, ["codigo", "codigo_2"]);
    }
}
