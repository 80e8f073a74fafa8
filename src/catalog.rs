use std::path::{Path, PathBuf};

use byteorder::BigEndian;
use heed::types::{Str, U64};
use heed::{Database, Env, EnvOpenOptions, WithTls};
use log::debug;

use crate::loader::FileLoader;
use crate::types::ImageId;

/// 图库：为每个图片路径分配稳定的 [`ImageId`]
///
/// ID 从 1 开始递增，删除的 ID 不会被重新分配
pub struct Catalog {
    env: Env<WithTls>,
    db_meta: Database<Str, U64<BigEndian>>,
    /// 路径 -> ID
    db_path: Database<Str, U64<BigEndian>>,
    /// ID -> 路径
    db_image: Database<U64<BigEndian>, Str>,
}

impl Catalog {
    pub fn open<P: AsRef<Path>>(path: P) -> heed::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(heed::Error::Io)?;
        debug!("打开图库: {}", path.display());

        let env = unsafe { EnvOpenOptions::new().map_size(1 << 30).max_dbs(3).open(path)? };
        let mut txn = env.write_txn()?;
        let db_meta = env.create_database(&mut txn, Some("meta"))?;
        let db_path = env.create_database(&mut txn, Some("path"))?;
        let db_image = env.create_database(&mut txn, Some("image"))?;
        txn.commit()?;

        Ok(Self { env, db_meta, db_path, db_image })
    }

    /// 登记图片路径，返回图片 ID 以及是否为新图片
    pub fn register<P: AsRef<Path>>(&self, path: P) -> heed::Result<(ImageId, bool)> {
        let path = path.as_ref().to_string_lossy();
        let mut txn = self.env.write_txn()?;
        if let Some(id) = self.db_path.get(&txn, &*path)? {
            return Ok((ImageId(id), false));
        }
        let id = self.db_meta.get(&txn, "next_id")?.unwrap_or(1);
        self.db_meta.put(&mut txn, "next_id", &(id + 1))?;
        self.db_path.put(&mut txn, &*path, &id)?;
        self.db_image.put(&mut txn, &id, &*path)?;
        txn.commit()?;
        Ok((ImageId(id), true))
    }

    /// 移除图片，返回图片是否存在
    pub fn remove(&self, id: ImageId) -> heed::Result<bool> {
        let mut txn = self.env.write_txn()?;
        let Some(path) = self.db_image.get(&txn, &id.0)?.map(str::to_owned) else {
            return Ok(false);
        };
        self.db_image.delete(&mut txn, &id.0)?;
        self.db_path.delete(&mut txn, &path)?;
        txn.commit()?;
        Ok(true)
    }

    pub fn find<P: AsRef<Path>>(&self, path: P) -> heed::Result<Option<ImageId>> {
        let txn = self.env.read_txn()?;
        Ok(self.db_path.get(&txn, &path.as_ref().to_string_lossy())?.map(ImageId))
    }

    pub fn path(&self, id: ImageId) -> heed::Result<Option<PathBuf>> {
        let txn = self.env.read_txn()?;
        Ok(self.db_image.get(&txn, &id.0)?.map(PathBuf::from))
    }

    /// 按 ID 顺序返回所有图片
    pub fn images(&self) -> heed::Result<Vec<(ImageId, PathBuf)>> {
        let txn = self.env.read_txn()?;
        self.db_image
            .iter(&txn)?
            .map(|item| item.map(|(id, path)| (ImageId(id), PathBuf::from(path))))
            .collect()
    }

    pub fn len(&self) -> heed::Result<usize> {
        let txn = self.env.read_txn()?;
        Ok(self.db_image.len(&txn)? as usize)
    }

    pub fn is_empty(&self) -> heed::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 根据当前图库内容创建文件加载器
    pub fn loader(&self) -> heed::Result<FileLoader> {
        Ok(FileLoader::new(self.images()?))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_register() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(catalog.is_empty().unwrap());

        assert_eq!(catalog.register("/a.jpg").unwrap(), (ImageId(1), true));
        assert_eq!(catalog.register("/b.jpg").unwrap(), (ImageId(2), true));
        assert_eq!(catalog.register("/a.jpg").unwrap(), (ImageId(1), false));

        assert_eq!(catalog.find("/b.jpg").unwrap(), Some(ImageId(2)));
        assert_eq!(catalog.path(ImageId(1)).unwrap(), Some(PathBuf::from("/a.jpg")));
        assert_eq!(catalog.len().unwrap(), 2);
    }

    #[test]
    fn test_remove_does_not_reuse_id() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        catalog.register("/a.jpg").unwrap();
        assert!(catalog.remove(ImageId(1)).unwrap());
        assert!(!catalog.remove(ImageId(1)).unwrap());
        assert_eq!(catalog.find("/a.jpg").unwrap(), None);
        assert_eq!(catalog.register("/a.jpg").unwrap(), (ImageId(2), true));
    }

    #[test]
    fn test_reopen_and_loader() {
        let dir = tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path()).unwrap();
            catalog.register("/a.jpg").unwrap();
            catalog.register("/b.jpg").unwrap();
        }
        let catalog = Catalog::open(dir.path()).unwrap();
        let images = catalog.images().unwrap();
        assert_eq!(images[0], (ImageId(1), PathBuf::from("/a.jpg")));
        let loader = catalog.loader().unwrap();
        assert_eq!(loader.path(ImageId(2)), Some(Path::new("/b.jpg")));
    }
}
