//! 리소스 접근자
//!
//! 세션이 파일 시스템을 직접 만지지 않도록 하는 capability.
//! 호스트가 구현을 주입하며, 테스트는 메모리 구현으로 대체한다.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::message::ErrorCode;
use crate::{Error, Result};

/// 리소스 접근 capability
///
/// 모든 메서드는 전송 대상 이름 하나를 다룬다. 이름 해석(경로 결합,
/// 접근 제한)은 구현의 몫이다.
pub trait ResourceAccessor: Send + Sync {
    /// 대상 존재 여부
    fn exists(&self, name: &str) -> bool;

    /// 읽기 가능 여부
    fn can_read(&self, name: &str) -> bool;

    /// 쓰기 가능 여부
    fn can_write(&self, name: &str) -> bool;

    /// 사용 가능한 저장 공간 (바이트)
    fn usable_space(&self, name: &str) -> u64;

    /// 전체 내용 읽기
    fn read_all(&self, name: &str) -> Result<Vec<u8>>;

    /// 내용 끝에 덧붙이기
    fn append(&self, name: &str, data: &[u8]) -> Result<()>;

    /// 없으면 빈 대상 생성
    fn create_if_missing(&self, name: &str) -> Result<()>;
}

/// 디렉터리 기반 파일 시스템 접근자
///
/// 루트 밖으로 나가는 이름(`..`, 절대 경로)은 AccessViolation으로 거부한다.
/// 선택적으로 저장 용량 한도를 둘 수 있다 (한도 없으면 무제한 취급).
pub struct DirAccessor {
    root: PathBuf,
    space_limit: Option<u64>,
}

impl DirAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            space_limit: None,
        }
    }

    /// 저장 용량 한도를 둔 접근자 (바이트)
    pub fn with_space_limit(root: impl Into<PathBuf>, limit: u64) -> Self {
        Self {
            root: root.into(),
            space_limit: Some(limit),
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = Path::new(name);
        let escapes = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir));
        if escapes {
            return Err(Error::resource(
                ErrorCode::AccessViolation,
                format!("루트 밖 경로: {name}"),
            ));
        }
        Ok(self.root.join(path))
    }

    /// 루트 바로 아래 파일들의 총 크기
    fn used_space(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

impl ResourceAccessor for DirAccessor {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.exists()).unwrap_or(false)
    }

    fn can_read(&self, name: &str) -> bool {
        self.resolve(name)
            .map(|p| fs::File::open(p).is_ok())
            .unwrap_or(false)
    }

    fn can_write(&self, name: &str) -> bool {
        let Ok(path) = self.resolve(name) else {
            return false;
        };
        match fs::metadata(&path) {
            Ok(meta) => !meta.permissions().readonly(),
            // 아직 없는 대상은 생성 가능으로 본다
            Err(_) => true,
        }
    }

    fn usable_space(&self, _name: &str) -> u64 {
        match self.space_limit {
            Some(limit) => limit.saturating_sub(self.used_space()),
            None => u64::MAX,
        }
    }

    fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        fs::read(&path).map_err(|e| map_io_error(name, e))
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| map_io_error(name, e))?;
        file.write_all(data).map_err(|e| map_io_error(name, e))
    }

    fn create_if_missing(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(map_io_error(name, e)),
        }
    }
}

/// IO 에러를 와이어 에러 코드가 붙은 리소스 에러로 변환
fn map_io_error(name: &str, e: std::io::Error) -> Error {
    let code = match e.kind() {
        ErrorKind::NotFound => ErrorCode::FileNotFound,
        ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
        _ => ErrorCode::Undefined,
    };
    Error::resource(code, format!("{name}: {e}"))
}
