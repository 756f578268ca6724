//! Shared integration-test harness: an in-process `axum::Router` wired to
//! fake identity/metadata/shark collaborators, in the style of the
//! teacher's `tests/common/mod.rs` `TestApp` + `FakeStorage` — adapted here
//! because this service has no database of its own: fake identity and
//! metadata clients stand in for the teacher's real Postgres pool.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::{Body, Bytes as AxumBytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use manta_webapi::auth::identity::IdentityClient;
use manta_webapi::config::AppConfig;
use manta_webapi::error::{AppError, AppResult};
use manta_webapi::metadata::MetadataClient;
use manta_webapi::model::{Account, ObjectMetadata, Role, StorageNode, StorageNodePage, User};
use manta_webapi::mpu::UploadRecord;
use manta_webapi::picker::Picker;
use manta_webapi::routes::create_router;
use manta_webapi::shark::{Shark, SharkPutResult};
use manta_webapi::state::AppState;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const FINGERPRINT: &str = "unit:test:key";

#[derive(Default)]
pub struct FakeIdentityClient {
    accounts: Mutex<HashMap<String, Account>>,
    users: Mutex<HashMap<(Uuid, String), User>>,
}

impl FakeIdentityClient {
    pub fn insert_account(&self, account: Account) {
        self.accounts.lock().unwrap().insert(account.login.clone(), account);
    }

    pub fn insert_user(&self, account_uuid: Uuid, user: User) {
        self.users.lock().unwrap().insert((account_uuid, user.login.clone()), user);
    }
}

#[async_trait]
impl IdentityClient for FakeIdentityClient {
    async fn lookup_account(&self, login: &str) -> AppResult<Account> {
        self.accounts
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .ok_or(AppError::AccountDoesNotExist)
    }

    async fn lookup_user(&self, account_uuid: Uuid, login: &str) -> AppResult<User> {
        self.users
            .lock()
            .unwrap()
            .get(&(account_uuid, login.to_string()))
            .cloned()
            .ok_or(AppError::UserDoesNotExist)
    }

    async fn lookup_roles(&self, _role_uuids: &[Uuid]) -> AppResult<HashMap<Uuid, Role>> {
        Ok(HashMap::new())
    }
}

#[derive(Default)]
pub struct FakeMetadataClient {
    objects: Mutex<HashMap<String, ObjectMetadata>>,
    uploads: Mutex<HashMap<Uuid, UploadRecord>>,
}

#[async_trait]
impl MetadataClient for FakeMetadataClient {
    async fn get_object(&self, path: &str) -> AppResult<ObjectMetadata> {
        self.objects.lock().unwrap().get(path).cloned().ok_or(AppError::ResourceNotFound)
    }

    async fn put_object(&self, path: &str, metadata: ObjectMetadata) -> AppResult<()> {
        self.objects.lock().unwrap().insert(path.to_string(), metadata);
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> AppResult<()> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> AppResult<UploadRecord> {
        self.uploads.lock().unwrap().get(&id).cloned().ok_or(AppError::ResourceNotFound)
    }

    async fn put_upload(&self, record: &UploadRecord) -> AppResult<()> {
        self.uploads.lock().unwrap().insert(record.id, record.clone());
        Ok(())
    }

    async fn find_storage_nodes(
        &self,
        _max_percent_used: u32,
        _min_timestamp: i64,
        _cursor: Option<&str>,
    ) -> AppResult<StorageNodePage> {
        Ok(StorageNodePage { nodes: Vec::new(), next_id: None })
    }
}

#[derive(Default)]
pub struct FakeShark {
    objects: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl Shark for FakeShark {
    async fn put_object(
        &self,
        _shark: &manta_webapi::model::SharkRef,
        object_id: &str,
        bytes: Bytes,
        _content_type: Option<&str>,
    ) -> AppResult<SharkPutResult> {
        let content_md5 = {
            use base64::{engine::general_purpose::STANDARD, Engine};
            use md5::{Digest, Md5};
            STANDARD.encode(Md5::digest(&bytes))
        };
        let size = bytes.len() as u64;
        self.objects.lock().unwrap().insert(object_id.to_string(), bytes);
        Ok(SharkPutResult { content_md5, size })
    }

    async fn get_object(&self, _shark: &manta_webapi::model::SharkRef, object_id: &str) -> AppResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(object_id)
            .cloned()
            .ok_or(AppError::ResourceNotFound)
    }

    async fn delete_object(&self, _shark: &manta_webapi::model::SharkRef, object_id: &str) -> AppResult<()> {
        self.objects.lock().unwrap().remove(object_id);
        Ok(())
    }
}

pub struct TestKey {
    pub private: RsaPrivateKey,
    pub public_pem: String,
}

pub fn generate_test_key() -> TestKey {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).expect("generate test rsa key");
    let public_pem = RsaPublicKey::from(&private)
        .to_public_key_pem(LineEnding::LF)
        .expect("encode test rsa public key");
    TestKey { private, public_pem }
}

/// Builds the `Authorization: Signature ...` header value for a `date`-only
/// signed request, the minimal header set the pipeline defaults to when a
/// client omits `headers=`.
pub fn sign_date_header(key: &RsaPrivateKey, key_id: &str, date: &str) -> String {
    let signing_string = format!("date: {date}");
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    let signature = signing_key.sign(signing_string.as_bytes());
    let encoded = {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(signature.to_vec())
    };
    format!(r#"Signature keyId="{key_id}",algorithm="rsa-sha256",headers="date",signature="{encoded}""#)
}

pub struct TestApp {
    router: Router,
    pub identity: std::sync::Arc<FakeIdentityClient>,
    pub metadata: std::sync::Arc<FakeMetadataClient>,
    pub shark: std::sync::Arc<FakeShark>,
    pub picker: std::sync::Arc<Picker>,
}

impl TestApp {
    pub fn new() -> Self {
        let config = AppConfig {
            server_host: "127.0.0.1".into(),
            server_port: 0,
            mahi_base_url: "http://mahi.invalid".into(),
            mahi_cache_ttl_secs: 10,
            metadata_base_url: "http://metadata.invalid".into(),
            metadata_shards: 1,
            metadata_cache_capacity: 64,
            metadata_cache_ttl_secs: 5,
            shark_request_timeout_secs: 30,
            token_salt: "test-salt".into(),
            token_key: "test-key".into(),
            token_iv: "test-iv".into(),
            token_max_age_secs: 3600,
            picker_refresh_interval_secs: 3600,
            picker_utilization_ceiling: 90,
            picker_staleness_secs: 3600,
            picker_ignore_size: true,
            picker_multi_dc: false,
            mpu_min_copies: 1,
            mpu_max_copies: 3,
            mpu_min_part_size: 16,
            cors_allowed_origin: None,
            public_access_prefix: "public".into(),
        };

        let identity = std::sync::Arc::new(FakeIdentityClient::default());
        let metadata = std::sync::Arc::new(FakeMetadataClient::default());
        let shark = std::sync::Arc::new(FakeShark::default());
        let picker = std::sync::Arc::new(Picker::new(&config));

        let mut inventory = HashMap::new();
        inventory.insert(
            "dc1".to_string(),
            vec![StorageNode {
                datacenter: "dc1".into(),
                manta_storage_id: "shark1.dc1.example.com".into(),
                available_mb: 1_000_000,
                percent_used: 10,
                timestamp: 0,
            }],
        );
        picker.set_inventory_for_test(inventory);

        let state = AppState::new(
            config,
            identity.clone() as std::sync::Arc<dyn IdentityClient>,
            metadata.clone() as std::sync::Arc<dyn MetadataClient>,
            picker.clone(),
            shark.clone() as std::sync::Arc<dyn Shark>,
        );

        let router = create_router(state);
        Self { router, identity, metadata, shark, picker }
    }

    pub fn insert_account(&self, login: &str, uuid: Uuid, is_operator: bool, keys: HashMap<String, String>) -> Account {
        let account = Account {
            uuid,
            login: login.to_string(),
            approved_for_provisioning: true,
            is_operator,
            groups: Default::default(),
            keys,
        };
        self.identity.insert_account(account.clone());
        account
    }

    pub async fn request(&self, method: &str, uri: &str, headers: &[(&str, &str)], body: Vec<u8>) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("build request");
        self.router.clone().oneshot(request).await.expect("infallible response")
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> axum::response::Response {
        self.request("GET", uri, headers, Vec::new()).await
    }
}

pub async fn body_bytes(response: axum::response::Response) -> AxumBytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read response body")
}

pub fn rfc2822_now() -> String {
    chrono::Utc::now().to_rfc2822()
}

#[allow(dead_code)]
pub fn status_is(response: &axum::response::Response, status: StatusCode) -> bool {
    response.status() == status
}
