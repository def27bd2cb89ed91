/// etcd key schema for plugin records.
pub struct Schema {
    prefix: String,
}

impl Schema {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn plugins_prefix(&self) -> String {
        format!("{}/plugins/", self.prefix)
    }

    pub fn plugin_key(&self, name: &str) -> String {
        format!("{}/plugins/{}", self.prefix, name)
    }
}
