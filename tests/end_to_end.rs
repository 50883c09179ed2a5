//! Full server over real sockets: handshake, listing, upload, bulk download

use std::io::Read;
use std::net::SocketAddr;

use lanshare::client::{UploadClient, UploadClientConfig};
use lanshare::{ShareConfig, ShareServer};
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::StatusCode;
use secrecy::SecretString;
use tempfile::TempDir;

struct Running {
    addr: SocketAddr,
    _media: TempDir,
    _scratch: TempDir,
    destination: TempDir,
}

async fn start_server(pin: &str) -> Running {
    let media = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let destination = TempDir::new().unwrap();

    std::fs::create_dir(media.path().join("trip")).unwrap();
    for (file, color) in [("a.png", [255u8, 0, 0]), ("trip/b.png", [0, 0, 255])] {
        image::RgbImage::from_pixel(40, 30, image::Rgb(color))
            .save(media.path().join(file))
            .unwrap();
    }
    std::fs::write(media.path().join("notes.txt"), b"skip me").unwrap();

    let mut config = ShareConfig::default();
    config.server.bind = "127.0.0.1".into();
    config.server.port = 0;
    config.auth.token = Some(SecretString::new(pin.to_string()));
    config.catalog.root = Some(media.path().to_path_buf());
    config.upload.scratch_dir = Some(scratch.path().to_path_buf());
    config.upload.destination_dir = destination.path().to_path_buf();
    config.validate().unwrap();

    let server = ShareServer::new(&config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.run(listener).await });

    Running {
        addr,
        _media: media,
        _scratch: scratch,
        destination,
    }
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_share_session() {
    let running = start_server("2468").await;
    let base = format!("http://{}", running.addr);
    let client = http();

    // health needs no PIN
    let response = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // no credentials
    let response = client.get(format!("{}/", base)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // handshake
    let response = client.get(format!("{}/?t=2468", base)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/");
    let cookie = response.headers()[SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    // listing with the cookie only
    let response = client
        .get(format!("{}/", base))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = response.text().await.unwrap();
    assert!(html.contains("Shared media (2)"));

    // upload through the client
    let source = TempDir::new().unwrap();
    let data: Vec<u8> = (0..70_000u32).map(|i| (i % 253) as u8).collect();
    let path = source.path().join("sent.mp4");
    std::fs::write(&path, &data).unwrap();
    let config = UploadClientConfig::new(&format!("{}/", base))
        .unwrap()
        .with_token(Some("2468".into()))
        .with_chunk_size(16 * 1024);
    UploadClient::new(config)
        .unwrap()
        .upload_file(&path)
        .await
        .unwrap();
    let stored = std::fs::read(running.destination.path().join("sent.mp4")).unwrap();
    assert_eq!(stored, data);

    // bulk download is flat and complete
    let response = client
        .get(format!("{}/zip", base))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/zip");
    let bytes = response.bytes().await.unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert!(image::load_from_memory(&content).is_ok());
        names.push(entry.name().to_string());
    }
    names.sort();
    assert_eq!(names, vec!["a.png", "b.png"]);
}
