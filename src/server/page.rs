//! HTML listing page and the browser upload client

use crate::catalog::CatalogSnapshot;
use crate::core::utils::{escape_html, percent_encode};

use super::state::PageOptions;

const STYLE: &str = r#"<style>
body{font-family:sans-serif;max-width:1000px;margin:24px auto;padding:0 12px}
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(220px,1fr));gap:12px}
.card{border:1px solid #ddd;border-radius:8px;padding:10px}
.thumb{width:100%;height:auto;display:block;border-radius:6px;background:#f5f5f5}
.top{display:flex;justify-content:space-between;align-items:center;margin-bottom:10px;flex-wrap:wrap;gap:8px}
.upload{border:1px dashed #aaa;border-radius:10px;padding:14px;margin:16px 0}
.pf{height:6px;background:#ddd;border-radius:6px;overflow:hidden}
.pf>span{display:block;height:6px;background:#4caf50;width:0%}
.overall{position:sticky;bottom:0;background:#fffccf;border-top:1px solid #ddd;padding:10px;margin-top:18px}
.row{display:flex;align-items:center;gap:8px;flex-wrap:wrap}
.hint{opacity:.7;margin-top:8px}
</style>"#;

/// Resumable upload client. `__CHUNK__` is replaced with the chunk size.
const SCRIPT: &str = r#"<script>
function fmtBytes(b){if(b<1024)return b+' B';if(b<1048576)return (b/1024).toFixed(1)+' KB';if(b<1073741824)return (b/1048576).toFixed(1)+' MB';return (b/1073741824).toFixed(2)+' GB';}
function fmtTime(s){if(!isFinite(s)||s<=0)return '--';const h=Math.floor(s/3600),m=Math.floor((s%3600)/60),x=Math.floor(s%60);return (h?h+'h ':'')+(m?m+'m ':'')+x+'s';}
const $=id=>document.getElementById(id);
const log=$('log'),ov=$('overall');
function logItem(name){const li=document.createElement('li');const b=document.createElement('b');b.textContent=name;li.appendChild(b);li.insertAdjacentHTML('beforeend',' <span class="p">0%</span><div class="pf"><span class="bar"></span></div>');log.appendChild(li);return li;}
const CHUNK=__CHUNK__;
function showDownload(loaded,total,started){
  ov.style.display='block';
  const pct=total?100*loaded/total:0;
  $('ovTxt').textContent=Math.floor(pct)+'% ('+fmtBytes(loaded)+(total?' / '+fmtBytes(total):'')+')';
  $('ovBar').style.width=pct+'%';
  if(started){
    const speed=loaded/Math.max((performance.now()-started)/1000,0.001);
    $('ovSpd').textContent=(speed/1048576).toFixed(2)+' MB/s';
    $('ovLeft').textContent=total?fmtTime((total-loaded)/(speed||1)):'--';
  }
}
if('serviceWorker' in navigator){
  navigator.serviceWorker.register('/sw.js').catch(()=>{});
  navigator.serviceWorker.addEventListener('message',e=>{
    if(e.data&&e.data.type==='downloadProgress')showDownload(e.data.loaded,e.data.total,0);
  });
}
for(const a of document.querySelectorAll('a.dl')){
  a.addEventListener('click',async ev=>{
    ev.preventDefault();
    const href=a.getAttribute('href');
    try{
      const resp=await fetch(href);
      if(!resp.ok||!resp.body)throw new Error(String(resp.status));
      const total=Number(resp.headers.get('Content-Length'))||0;
      const reader=resp.body.getReader();const chunks=[];let loaded=0;const started=performance.now();
      for(;;){
        const {done,value}=await reader.read();
        if(done)break;
        chunks.push(value);loaded+=value.length;showDownload(loaded,total,started);
      }
      const url=URL.createObjectURL(new Blob(chunks));
      const link=document.createElement('a');
      link.href=url;link.download=new URL(href,location).searchParams.get('name')||'download';
      document.body.appendChild(link);link.click();link.remove();URL.revokeObjectURL(url);
    }catch(e){location.href=a.href;}
  });
}
function pairLivePhotos(files){
  const groups=new Map();
  for(const f of files){
    const dot=f.name.lastIndexOf('.');
    const stem=(dot>0?f.name.slice(0,dot):f.name).toLowerCase();
    if(!groups.has(stem))groups.set(stem,[]);
    groups.get(stem).push(f);
  }
  return Array.from(groups.values()).flat();
}
async function post(path,headers,body,tries){
  tries=tries||1;
  for(let attempt=0;;attempt++){
    let r;
    try{r=await fetch(path,{method:'POST',headers,body});}
    catch(e){if(attempt+1>=tries)throw e;}
    if(r){
      if(r.ok)return r.text();
      const msg=await r.text();
      if(r.status<500||attempt+1>=tries)throw new Error(msg);
    }
    await new Promise(res=>setTimeout(res,500*(attempt+1)));
  }
}
async function uploadResumable(file,mbps,onProgress){
  const id=await post('/upload_init',{'x-name':encodeURIComponent(file.name),'x-size':String(file.size),'x-mime':file.type||'application/octet-stream'});
  let offset=0;const start=performance.now();
  while(offset<file.size){
    const end=Math.min(offset+CHUNK,file.size);
    await post('/upload_chunk',{'x-id':id,'x-offset':String(offset),'x-total':String(file.size)},file.slice(offset,end),3);
    offset=end;
    if(mbps>0){const wait=offset/(mbps*1048576)-(performance.now()-start)/1000;if(wait>0)await new Promise(r=>setTimeout(r,wait*1000));}
    onProgress(offset,file.size);
  }
  await post('/upload_finish',{'x-id':id});
}
$('btnUp').onclick=async()=>{
  const files=pairLivePhotos(Array.from($('f').files||[]));
  if(files.length===0){alert('Select one or more photos or videos');return;}
  ov.style.display='block';$('st').textContent='Uploading...';
  const totalSize=files.reduce((a,f)=>a+f.size,0)||1;
  const progress=new Map();const started=performance.now();
  const concurrency=Math.max(1,Math.min(4,Number($('concurrency').value||1)));
  const mbps=Math.max(0,Number($('mbps').value||0));
  function overall(){
    let sent=0;for(const v of progress.values())sent+=v;
    const speed=sent/Math.max((performance.now()-started)/1000,0.001);
    $('ovTxt').textContent=Math.floor(100*sent/totalSize)+'% ('+fmtBytes(sent)+' / '+fmtBytes(totalSize)+')';
    $('ovBar').style.width=(100*sent/totalSize)+'%';
    $('ovSpd').textContent=(speed/1048576).toFixed(2)+' MB/s';
    $('ovLeft').textContent=fmtTime((totalSize-sent)/(speed||1));
  }
  let next=0;
  const runners=new Array(concurrency).fill(0).map(async()=>{
    while(next<files.length){
      const f=files[next++];const row=logItem(f.name);
      try{
        await uploadResumable(f,mbps,(loaded,total)=>{
          const pct=Math.floor(100*loaded/total);
          row.querySelector('.p').textContent=pct+'%';row.querySelector('.bar').style.width=pct+'%';
          progress.set(f,loaded);overall();
        });
        if(f.size===0){row.querySelector('.p').textContent='100%';}
      }catch(e){const s=document.createElement('span');s.style.color='red';s.textContent=' failed: '+e.message;row.appendChild(s);}
    }
  });
  await Promise.all(runners);
  $('st').textContent='Done.';
};
</script>"#;

/// Service worker that reports download progress back to the page
pub const SERVICE_WORKER: &str = r#"self.addEventListener('install',()=>self.skipWaiting());
self.addEventListener('activate',e=>e.waitUntil(self.clients.claim()));
self.addEventListener('fetch',event=>{
  const url=new URL(event.request.url);
  if(url.pathname!=='/zip'&&url.pathname!=='/file')return;
  event.respondWith((async()=>{
    const resp=await fetch(event.request);
    const total=Number(resp.headers.get('Content-Length'))||0;
    if(!resp.body)return resp;
    const reader=resp.body.getReader();let loaded=0;
    const stream=new ReadableStream({
      async pull(controller){
        const {done,value}=await reader.read();
        if(done){controller.close();return;}
        loaded+=value.length;
        const clients=await self.clients.matchAll();
        clients.forEach(c=>c.postMessage({type:'downloadProgress',loaded,total}));
        controller.enqueue(value);
      },
      cancel(reason){reader.cancel(reason);}
    });
    return new Response(stream,{status:resp.status,statusText:resp.statusText,headers:resp.headers});
  })());
});
"#;

/// Render the listing page for one catalog snapshot
pub fn render_page(snapshot: &CatalogSnapshot, options: &PageOptions) -> String {
    let mut html = String::with_capacity(4096 + snapshot.len() * 256);
    html.push_str("<!doctype html><html><head><meta charset='utf-8'>");
    html.push_str("<meta name='viewport' content='width=device-width,initial-scale=1'>");
    html.push_str("<title>LanShare</title>");
    html.push_str(STYLE);
    html.push_str("</head><body>");

    html.push_str(&format!(
        "<div class='top'><h2>Shared media ({})</h2>",
        snapshot.len()
    ));
    html.push_str("<div class='row'><a id='dlzip' href='/zip' download>Download all</a>");
    html.push_str(&format!(
        "<label>Parallel uploads: <input id='concurrency' type='number' min='1' max='4' value='{}' style='width:60px'></label>",
        options.upload_concurrency.clamp(1, 4)
    ));
    html.push_str("<label>Bandwidth limit: <input id='mbps' type='number' min='0' step='0.1' value='0' style='width:80px'> MB/s (0 = unlimited)</label>");
    html.push_str("</div></div>");

    html.push_str("<div class='upload'><h3>Upload photos and videos</h3>");
    html.push_str("<input id='f' type='file' accept='image/*,video/*' multiple> ");
    html.push_str("<button id='btnUp'>Upload</button> <span id='st'></span>");
    html.push_str("<div id='overall' class='overall' style='display:none'>");
    html.push_str("<div>Total: <span id='ovTxt'>0%</span> &middot; Speed: <span id='ovSpd'>0 MB/s</span> &middot; Remaining: <span id='ovLeft'>--</span></div>");
    html.push_str("<div class='pf'><span id='ovBar'></span></div></div>");
    html.push_str("<ul id='log'></ul>");
    html.push_str("<p class='hint'>Live Photos: select both the photo (HEIC/JPG) and its MOV; files sharing a name are sent next to each other.</p>");
    html.push_str("</div>");

    html.push_str("<div class='grid'>");
    for entry in snapshot.entries() {
        let id = entry.id();
        let encoded = percent_encode(entry.name());
        let shown = escape_html(entry.name());
        html.push_str("<div class='card'>");
        html.push_str(&format!(
            "<img class='thumb' loading='lazy' src='/thumb?id={}' alt='{}'>",
            id, shown
        ));
        html.push_str(&format!(
            "<div><a class='dl' href='/file?id={}&amp;name={}' download='{}'>{}</a></div>",
            id, encoded, shown, shown
        ));
        html.push_str("</div>");
    }
    html.push_str("</div>");

    html.push_str(&SCRIPT.replace("__CHUNK__", &options.chunk_size.to_string()));
    html.push_str("</body></html>");
    html
}
