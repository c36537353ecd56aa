//! Fixture keys and token minting shared by the unit tests.

use crate::keys::{RemoteKey, RemoteKeySet};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey};

pub const P256_PRIVATE_KEY: &str = include_str!("../testdata/p256-private-key.p8");
pub const P256_PUBLIC_KEY: &str = include_str!("../testdata/p256-public-key.pem");
pub const P384_PRIVATE_KEY: &str = include_str!("../testdata/p384-private-key.p8");
/// Stands in for the key Apple signs identity tokens with
pub const RSA_SIGNING_KEY: &str = include_str!("../testdata/rsa-signing-key.pem");
/// A key Apple never published
pub const RSA_FOREIGN_KEY: &str = include_str!("../testdata/rsa-foreign-key.pem");

pub const RSA_SIGNING_MODULUS: &str = "s6YiaoobpzmXpwoC8F6mbyJY8HVMUiUJ_3snkbfmUFaTuMZhQ68zQd8U-ZNz8QlJWPYVgvxJ8XAWcu_C1tz-Xd9xcclEYyspV8Xv-I0WTuONRRO9OA7fnbZYQI6sGVeclcg-nSqgWpk2M4s-FXZjA3ttfvjh8BjEsrjkjF458XKhxB2UEJUpF9GNqPl7sg7EOUcCTAt0ntl9r_yb9i88vkmgTDUhQtEbXUtmMiTtYx88lIJaI5ZmWWj7jz_fTdncrjl7W2Fd_ZEK8y-poOReKBKPRaqBwLxKxkajwFqdMr_MbspbJIHUCryMY--Wtfl7ITVM2aVKpVRhcCCl1is6Jw";
pub const RSA_FOREIGN_MODULUS: &str = "gtrFj7h2uQ3QTy7OQSMHN8S0-u42hWkubkyXDUcNjYwoaUPZUbs3cz1DGJ9bY8Eru09llrXGWiB4QMMB2RT9CBCh9FBteYwKgjk_oHme7mYCouspqk6J8-2V5Od2BdjLzXuyKaaNP5CPUF7zEuOS_OKR_B2TZOsVbUQpigU_Kwbgh7JyHn5G43TwYc2aUSBjXy95uA1xfboDP_IlcB0G5Z-kq4SVIxfc763f6mZbxXRfuMrIQy6kMxTHYDGkncgTQvUR2qlU0Zv_btoakRwuk_Cj-ITXUuulmPmq5tjCy2EKyBgCNtO-5IV4VJSbjYZpNTDLEwqR13YRW_HYmV9oGQ";

pub const APPLE_KID: &str = "apple-key-1";

pub fn p256_key_file() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/p256-private-key.p8").to_string()
}

/// The JWKS Apple would publish: only the signing key.
pub fn apple_key_set() -> RemoteKeySet {
    RemoteKeySet::new(vec![RemoteKey::rsa(APPLE_KID, RSA_SIGNING_MODULUS, "AQAB")])
}

/// Sign `claims` with RS256 under a hand-built header.
///
/// `alg` and `kid` are written verbatim (or left out), which lets tests
/// produce headers a strict decoder would refuse.
pub fn mint_id_token(
    claims: &serde_json::Value,
    alg: Option<&str>,
    kid: Option<&str>,
    private_key_pem: &str,
) -> String {
    let mut header = serde_json::Map::new();
    if let Some(alg) = alg {
        header.insert("alg".to_string(), alg.into());
    }
    if let Some(kid) = kid {
        header.insert("kid".to_string(), kid.into());
    }

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap())
    );
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).unwrap();
    let signature =
        jsonwebtoken::crypto::sign(signing_input.as_bytes(), &key, Algorithm::RS256).unwrap();

    format!("{}.{}", signing_input, signature)
}

/// Claims of a fresh identity token for `sub`.
pub fn id_token_claims(sub: &str) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp();
    serde_json::json!({
        "iss": "https://appleid.apple.com",
        "aud": "mock.example",
        "sub": sub,
        "iat": now,
        "exp": now + 600,
    })
}
