use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ql::learn::parameter::AgentParameter;
use ql::prelude::{AgentId, DatasetId, NetworkId, PersistenceStore, QlError};
use ql::tensor::Tensor;

const AGENTS: &str = "agents";
const NETWORKS: &str = "networks";
const DATASETS: &str = "datasets";
const STATS_FILE: &str = "stats.jsonl";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub kind: String,
    pub params: AgentParameter,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: NetworkId,
    pub agent: AgentId,
    pub info: String,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub agent: AgentId,
    pub network: NetworkId,
    pub series: String,
    pub epoch: u64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub dims: Vec<usize>,
}

/// [PersistenceStore] in a directory:
///
/// ```text
/// agents/<id>.json          agent records
/// networks/<id>.json|.bin   network records and snapshots
/// datasets/<id>.json|.bin   dataset records and little-endian f32 data
/// stats.jsonl               one statistic per line
/// ```
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: &Path) -> Result<Self> {
        for dir in [AGENTS, NETWORKS, DATASETS] {
            fs::create_dir_all(root.join(dir)).with_context(|| format!("failed to create {}", root.join(dir).display()))?;
        }
        log::debug!("opened store at {}", root.display());
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn agents(&self) -> Result<Vec<AgentRecord>> { self.records(AGENTS) }

    pub fn networks(&self) -> Result<Vec<NetworkRecord>> { self.records(NETWORKS) }

    pub fn datasets(&self) -> Result<Vec<DatasetRecord>> { self.records(DATASETS) }

    pub fn stats(&self) -> Result<Vec<StatRecord>> {
        let path = self.root.join(STATS_FILE);
        if !path.exists() {
            return Ok(vec![]);
        }
        BufReader::new(File::open(&path)?)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| -> Result<StatRecord> { Ok(serde_json::from_str(&line?)?) })
            .collect()
    }

    fn record_path(
        &self,
        dir: &str,
        id: u64,
        extension: &str,
    ) -> PathBuf {
        self.root.join(dir).join(format!("{}.{}", id, extension))
    }

    /// Ids of all records in `dir`, ascending
    fn ids(
        &self,
        dir: &str,
    ) -> Result<Vec<u64>> {
        let pattern = self.root.join(dir).join("*.json");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| QlError(format!("store path {} is not valid UTF-8", self.root.display())))?;
        let mut ids = vec![];
        for entry in glob::glob(pattern)? {
            let path = entry?;
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn next_id(
        &self,
        dir: &str,
    ) -> Result<u64> {
        Ok(self.ids(dir)?.last().map_or(1, |id| id + 1))
    }

    fn read_record<R: DeserializeOwned>(
        &self,
        dir: &str,
        id: u64,
    ) -> Result<R> {
        let path = self.record_path(dir, id, "json");
        let file = File::open(&path).with_context(|| format!("no record {} in {}", id, dir))?;
        serde_json::from_reader(BufReader::new(file)).with_context(|| format!("corrupt record {}", path.display()))
    }

    fn write_record<R: Serialize>(
        &self,
        dir: &str,
        id: u64,
        record: &R,
    ) -> Result<()> {
        let path = self.record_path(dir, id, "json");
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        Ok(())
    }

    fn records<R: DeserializeOwned>(
        &self,
        dir: &str,
    ) -> Result<Vec<R>> {
        self.ids(dir)?.into_iter().map(|id| self.read_record(dir, id)).collect()
    }
}

impl PersistenceStore for FileStore {
    fn create_agent(
        &mut self,
        name: &str,
        kind: &str,
        params: &AgentParameter,
    ) -> Result<AgentId> {
        let id = self.next_id(AGENTS)?;
        self.write_record(
            AGENTS,
            id,
            &AgentRecord {
                id,
                name: name.to_string(),
                kind: kind.to_string(),
                params: params.clone(),
            },
        )?;
        Ok(id)
    }

    fn update_agent_params(
        &mut self,
        agent: AgentId,
        params: &AgentParameter,
    ) -> Result<()> {
        let mut record: AgentRecord = self.read_record(AGENTS, agent)?;
        record.params = params.clone();
        self.write_record(AGENTS, agent, &record)
    }

    fn load_agent_params(
        &self,
        agent: AgentId,
    ) -> Result<AgentParameter> {
        let record: AgentRecord = self.read_record(AGENTS, agent)?;
        Ok(record.params)
    }

    fn save_network_snapshot(
        &mut self,
        agent: AgentId,
        info: &str,
        blob: &[u8],
    ) -> Result<NetworkId> {
        let id = self.next_id(NETWORKS)?;
        fs::write(self.record_path(NETWORKS, id, "bin"), blob)?;
        self.write_record(
            NETWORKS,
            id,
            &NetworkRecord {
                id,
                agent,
                info: info.to_string(),
                size: blob.len(),
            },
        )?;
        Ok(id)
    }

    fn load_network(
        &self,
        agent: AgentId,
        network: Option<NetworkId>,
    ) -> Result<(NetworkId, Vec<u8>)> {
        let id = match network {
            Some(id) => {
                let record: NetworkRecord = self.read_record(NETWORKS, id)?;
                if record.agent != agent {
                    return Err(QlError(format!("network {} belongs to agent {}, not {}", id, record.agent, agent)).into());
                }
                id
            }
            None => self
                .networks()?
                .into_iter()
                .filter(|n| n.agent == agent)
                .map(|n| n.id)
                .last()
                .ok_or_else(|| QlError(format!("agent {} has no saved network", agent)))?,
        };
        let blob = fs::read(self.record_path(NETWORKS, id, "bin"))?;
        Ok((id, blob))
    }

    fn append_stat(
        &mut self,
        agent: AgentId,
        network: NetworkId,
        series: &str,
        epoch: u64,
        value: f64,
    ) -> Result<()> {
        let record = StatRecord {
            agent,
            network,
            series: series.to_string(),
            epoch,
            value,
        };
        let mut file = OpenOptions::new().create(true).append(true).open(self.root.join(STATS_FILE))?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }

    fn list_datasets(
        &self,
        shape: &[usize],
        min_size: usize,
        max_size: usize,
    ) -> Result<Vec<(DatasetId, usize)>> {
        Ok(self
            .datasets()?
            .into_iter()
            .filter(|d| d.dims.len() == shape.len() + 1 && d.dims[1..] == *shape)
            .filter(|d| (min_size..=max_size).contains(&d.dims[0]))
            .map(|d| (d.id, d.dims[0]))
            .collect())
    }

    fn new_dataset(
        &mut self,
        data: &Tensor,
    ) -> Result<DatasetId> {
        let id = self.next_id(DATASETS)?;
        let bytes: Vec<u8> = data.data().iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(self.record_path(DATASETS, id, "bin"), bytes)?;
        self.write_record(
            DATASETS,
            id,
            &DatasetRecord {
                id,
                dims: data.dims().to_vec(),
            },
        )?;
        Ok(id)
    }

    fn load_dataset(
        &self,
        id: DatasetId,
    ) -> Result<Tensor> {
        let record: DatasetRecord = self.read_record(DATASETS, id)?;
        let bytes = fs::read(self.record_path(DATASETS, id, "bin"))?;
        let values = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Tensor::from_data(&record.dims, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_per_kind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = FileStore::open(dir.path())?;
        assert_eq!(store.create_agent("a", "kind", &AgentParameter::default())?, 1);
        assert_eq!(store.create_agent("b", "kind", &AgentParameter::default())?, 2);
        assert_eq!(store.save_network_snapshot(2, "0", &[1, 2])?, 1);
        assert_eq!(store.new_dataset(&Tensor::new(&[1, 1, 1, 1]))?, 1);
        assert_eq!(store.agents()?.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_empty_stats() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::open(dir.path())?;
        assert!(store.stats()?.is_empty());
        assert!(store.load_network(1, None).is_err());
        Ok(())
    }
}
