//! Property tests for host value coercion through native calls

mod common;

use common::*;
use fastcall::HostValue;
use proptest::prelude::*;

proptest! {
    #[test]
    fn int32_matches_host_conversion(x in any::<f64>()) {
        let lib = library("prop-int32");
        let f = declare(&lib, "id_int32", id_int32 as usize, "int32", &["int32"]);
        let value = HostValue::Number(x);
        prop_assert_eq!(f.invoke(&[value.clone()]).unwrap(), num(f64::from(value.to_int32())));
    }

    #[test]
    fn uint32_matches_host_conversion(x in -1e12f64..1e12) {
        let lib = library("prop-uint32");
        let f = declare(&lib, "id_uint32", id_uint32 as usize, "uint32", &["uint32"]);
        let value = HostValue::Number(x);
        prop_assert_eq!(f.invoke(&[value.clone()]).unwrap(), num(f64::from(value.to_uint32())));
    }

    #[test]
    fn int16_wraps_like_c(x in any::<i32>()) {
        let lib = library("prop-int16");
        let f = declare(&lib, "id_int16", id_int16 as usize, "int16", &["int16"]);
        prop_assert_eq!(f.invoke(&[x.into()]).unwrap(), num(f64::from(x as i16)));
    }

    #[test]
    fn double_is_exact(x in any::<f64>().prop_filter("NaN never compares equal", |v| !v.is_nan())) {
        let lib = library("prop-double");
        let f = declare(&lib, "id_double", id_double as usize, "double", &["double"]);
        prop_assert_eq!(f.invoke(&[num(x)]).unwrap(), num(x));
    }

    #[test]
    fn int64_follows_double_channel(x in any::<i64>()) {
        let lib = library("prop-int64");
        let f = declare(&lib, "id_int64", id_int64 as usize, "int64", &["int64"]);
        let rounded = x as f64;
        prop_assert_eq!(f.invoke(&[x.into()]).unwrap(), num(rounded as i64 as f64));
    }

    #[test]
    fn bool_uses_truthiness(x in any::<f64>(), s in ".{0,4}") {
        let lib = library("prop-bool");
        let f = declare(&lib, "id_bool", id_bool as usize, "bool", &["bool"]);
        for value in [num(x), HostValue::String(s.clone())] {
            let expected = HostValue::Bool(value.to_boolean());
            prop_assert_eq!(f.invoke(&[value]).unwrap(), expected);
        }
    }

    #[test]
    fn add_matches_wrapping_add(a in any::<i32>(), b in any::<i32>()) {
        let lib = library("prop-add");
        let f = declare(&lib, "add", wrapping_add as usize, "int", &["int", "int"]);
        prop_assert_eq!(f.invoke(&[a.into(), b.into()]).unwrap(), num(f64::from(a.wrapping_add(b))));
    }
}

extern "C" fn wrapping_add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}
