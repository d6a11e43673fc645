// known_hosts 编辑
//
// 先删除目标地址的全部旧记录，再以追加模式写入新扫描到的记录。
// 删除步骤先写临时文件再原子 rename，进程中途崩溃不会留下半截文件。
// 不对文件加锁：同一时间只应有一个写入者。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::error::TrustStoreError;
use super::keyscan::HostKeyRecords;

/// 可追加写入并显式关闭的目标
pub trait AppendSink: Write {
    /// 关闭并返回关闭结果
    fn close(self) -> io::Result<()>;
}

/// 以追加模式打开的 known_hosts 文件
pub struct StoreFile(File);

impl Write for StoreFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl AppendSink for StoreFile {
    // File 的 drop 会吞掉错误，先 sync_all 把延迟的写入错误暴露出来
    fn close(self) -> io::Result<()> {
        self.0.sync_all()
    }
}

/// 写入并关闭；关闭总会执行，写入错误在前，关闭错误追加在后
pub fn write_then_close<S: AppendSink>(
    mut sink: S,
    data: &[u8],
    path: &Path,
) -> Result<(), TrustStoreError> {
    let write_result = sink.write_all(data).and_then(|()| sink.flush());
    let close_result = sink.close();

    let mut errors = Vec::new();
    if let Err(source) = write_result {
        errors.push(TrustStoreError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    if let Err(source) = close_result {
        errors.push(TrustStoreError::Close {
            path: path.to_path_buf(),
            source,
        });
    }
    TrustStoreError::combine(errors)
}

/// 一行记录是否属于给定的主机名集合
///
/// 只看第一个字段（逗号分隔的主机列表），10.0.0.5 不会误删 10.0.0.50。
/// 哈希过的主机名（HashKnownHosts）按 |1|salt|hash 逐个候选名比对
pub fn line_matches(line: &str, names: &[String]) -> bool {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return false;
    }

    let mut fields = line.split_whitespace();
    let mut first = fields.next().unwrap_or_default();
    // @cert-authority / @revoked 标记后面才是主机列表
    if first.starts_with('@') {
        first = fields.next().unwrap_or_default();
    }

    first.split(',').any(|host| host_matches(host, names))
}

fn host_matches(host: &str, names: &[String]) -> bool {
    match host.strip_prefix("|1|") {
        Some(hashed) => hashed_host_matches(hashed, names),
        None => names.iter().any(|name| name == host),
    }
}

/// HMAC-SHA1(salt, name) 与记录中的哈希比对；格式不对的条目视为不匹配
fn hashed_host_matches(hashed: &str, names: &[String]) -> bool {
    let (salt, hash) = match hashed.split_once('|') {
        Some(parts) => parts,
        None => return false,
    };
    let (salt, hash) = match (STANDARD.decode(salt), STANDARD.decode(hash)) {
        (Ok(salt), Ok(hash)) => (salt, hash),
        _ => return false,
    };

    names.iter().any(|name| {
        let mut mac = match Hmac::<Sha1>::new_from_slice(&salt) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(name.as_bytes());
        mac.verify_slice(&hash).is_ok()
    })
}

/// 目标地址在 known_hosts 里可能出现的写法
fn host_names(target: Ipv4Addr, port: u16) -> Vec<String> {
    let mut names = vec![format!("[{}]:{}", target, port)];
    if port == 22 {
        names.push(target.to_string());
    }
    names
}

/// known_hosts 信任库
#[derive(Clone, Debug)]
pub struct TrustStore {
    path: PathBuf,
    keep_backup: bool,
}

impl TrustStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep_backup: false,
        }
    }

    /// 删除记录前把原文件保存为 <path>.old（与 ssh-keygen -R 一致）
    pub fn with_backup(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    /// 删除目标的旧记录并追加新记录，返回删除的行数
    pub fn replace(
        &self,
        target: Ipv4Addr,
        port: u16,
        records: &HostKeyRecords,
    ) -> Result<usize, TrustStoreError> {
        let removed = self.remove_host(target, port)?;
        self.append(records)?;

        info!(
            "[KnownHosts] Replaced host key for {} in {:?} ({} old, {} new)",
            target,
            self.path,
            removed,
            records.len()
        );
        Ok(removed)
    }

    /// 删除目标地址的全部记录（幂等，没有记录也算成功）
    pub fn remove_host(&self, target: Ipv4Addr, port: u16) -> Result<usize, TrustStoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.create_empty()?;
                return Ok(0);
            }
            Err(source) => {
                return Err(TrustStoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let names = host_names(target, port);
        let mut kept = String::with_capacity(content.len());
        let mut removed = 0;
        for line in content.split_inclusive('\n') {
            if line_matches(line, &names) {
                removed += 1;
            } else {
                kept.push_str(line);
            }
        }

        if removed == 0 {
            debug!("[KnownHosts] No existing record for {}", target);
            return Ok(0);
        }

        if !kept.is_empty() && !kept.ends_with('\n') {
            kept.push('\n');
        }

        self.rewrite(&kept)?;
        debug!("[KnownHosts] Removed {} record(s) for {}", removed, target);
        Ok(removed)
    }

    /// 以追加模式写入记录，保证文件在所有路径上都被关闭
    pub fn append(&self, records: &HostKeyRecords) -> Result<(), TrustStoreError> {
        let mut data = records.to_bytes();
        // 旧文件最后一行缺少换行时先补上，避免新记录接在旧行后面
        if self.missing_trailing_newline()? {
            data.insert(0, b'\n');
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| TrustStoreError::Open {
                path: self.path.clone(),
                source,
            })?;

        write_then_close(StoreFile(file), &data, &self.path)
    }

    fn missing_trailing_newline(&self) -> Result<bool, TrustStoreError> {
        let read_err = |source| TrustStoreError::Read {
            path: self.path.clone(),
            source,
        };

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            // 交给 append 的 open 报告
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(read_err(source)),
        };
        let len = file.metadata().map_err(read_err)?.len();
        if len == 0 {
            return Ok(false);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).map_err(read_err)?;
        file.read_exact(&mut last).map_err(read_err)?;
        Ok(last[0] != b'\n')
    }

    /// 原子替换文件内容，保留原权限
    fn rewrite(&self, content: &str) -> Result<(), TrustStoreError> {
        let remove_err = |source| TrustStoreError::Remove {
            path: self.path.clone(),
            source,
        };

        if self.keep_backup {
            fs::copy(&self.path, self.backup_path()).map_err(remove_err)?;
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(remove_err)?;
        tmp.write_all(content.as_bytes()).map_err(remove_err)?;
        tmp.as_file().sync_all().map_err(remove_err)?;

        let permissions = fs::metadata(&self.path).map_err(remove_err)?.permissions();
        fs::set_permissions(tmp.path(), permissions).map_err(remove_err)?;

        tmp.persist(&self.path).map_err(|e| remove_err(e.error))?;
        Ok(())
    }

    /// 信任库不存在时创建空文件（目录 0700，文件 0600）
    fn create_empty(&self) -> Result<(), TrustStoreError> {
        let open_err = |source| TrustStoreError::Open {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                let mut builder = fs::DirBuilder::new();
                builder.recursive(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::DirBuilderExt;
                    builder.mode(0o700);
                }
                builder.create(parent).map_err(open_err)?;
            }
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&self.path).map_err(open_err)?;

        info!("[KnownHosts] Created empty {:?}", self.path);
        Ok(())
    }
}
