use crate::html::Globals;
use gtmpl::Value;
use std::collections::HashMap;

impl From<&Globals> for Value {
    fn from(globals: &Globals) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("current_year".to_owned(), Value::from(globals.current_year));
        Value::Object(m)
    }
}
