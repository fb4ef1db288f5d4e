//! Утилиты для работы с файлами модели на диске.
//!
//! Директория модели содержит:
//! - `config.json`: конфигурация архитектуры (необязательно);
//! - `model.safetensors` или шарды `model-0000N-of-0000M.safetensors`;
//! - `labels.json`: массив имён классов (необязательно).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AudioError, AudioResult};

#[derive(serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Разрешить список safetensors-файлов в директории модели.
///
/// Поддерживает:
/// - `model.safetensors` (один файл)
/// - `model.safetensors.index.json` + шарды
/// - fallback: поиск `model-*-of-*.safetensors` без index.json
pub fn resolve_safetensors_files(model_dir: impl AsRef<Path>) -> AudioResult<Vec<PathBuf>> {
    let model_dir = model_dir.as_ref();

    let single = model_dir.join("model.safetensors");
    if single.exists() {
        return Ok(vec![single]);
    }

    let index_path = model_dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let data = std::fs::read(&index_path)?;
        let idx: SafetensorsIndex = serde_json::from_slice(&data)?;

        // Для детерминизма порядок шардов сортируется.
        let uniq: BTreeSet<&String> = idx.weight_map.values().collect();

        let mut out = Vec::with_capacity(uniq.len());
        for shard in uniq {
            let p = model_dir.join(shard);
            if !p.exists() {
                return Err(AudioError::Model(format!(
                    "index.json ссылается на отсутствующий шард: {}",
                    p.display()
                )));
            }
            out.push(p);
        }

        if out.is_empty() {
            return Err(AudioError::Model(format!(
                "Пустой weight_map в {}",
                index_path.display()
            )));
        }

        return Ok(out);
    }

    let mut shards: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(model_dir)? {
        let p = entry?.path();
        if !p.is_file() {
            continue;
        }
        let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.starts_with("model-") && name.ends_with(".safetensors") && name.contains("-of-") {
            shards.push(p);
        }
    }
    shards.sort();
    if !shards.is_empty() {
        return Ok(shards);
    }

    Err(AudioError::Model(format!(
        "В директории модели не найден ни model.safetensors, ни index.json, ни шардов: {}",
        model_dir.display()
    )))
}

/// Загрузить имена классов из `labels.json`, если файл существует.
pub fn load_labels(model_dir: impl AsRef<Path>) -> AudioResult<Option<Vec<String>>> {
    let path = model_dir.as_ref().join("labels.json");
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(&path)?;
    let labels: Vec<String> = serde_json::from_str(&data)?;
    debug!("labels.json: {} классов", labels.len());
    Ok(Some(labels))
}
