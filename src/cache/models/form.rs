use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routes::form::FormRecord;

/// 公开表单缓存模型
/// 只保留渲染公开表单需要的字段，不含所有者、状态、提交数等可变信息
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedFormPayload {
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub require_auth: bool,
}

impl CachedFormPayload {
    /// 从任意可序列化的数据中投影出公开字段，其余字段全部丢弃
    pub fn project<T: Serialize + ?Sized>(source: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(source)?;
        serde_json::from_value(value)
    }
}

impl From<&FormRecord> for CachedFormPayload {
    fn from(form: &FormRecord) -> Self {
        Self {
            schema: form.schema.clone(),
            settings: form.settings.clone(),
            require_auth: form.require_auth,
        }
    }
}
